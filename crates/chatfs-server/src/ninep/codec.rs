//! 9P2000 wire format.
//!
//! Every message is `size[4] type[1] tag[2] body`, little-endian, with
//! strings as `len[2] utf8`. Only the server's half is needed at runtime
//! (decode T-messages, encode R-messages); the client half exists for the
//! in-process tests.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

pub const VERSION: &str = "9P2000";
pub const NOTAG: u16 = 0xFFFF;
pub const NOFID: u32 = u32::MAX;

/// Bytes preceding the data of an Rread: size, type, tag and count.
pub const READ_OVERHEAD: u32 = 4 + 1 + 2 + 4;

/// Most names accepted in a single walk.
pub const MAX_WALK_ELEMENTS: usize = 16;

pub const DMDIR: u32 = 0x8000_0000;
pub const QTDIR: u8 = 0x80;
pub const QTFILE: u8 = 0x00;

pub const OREAD: u8 = 0;
pub const OWRITE: u8 = 1;
pub const ORDWR: u8 = 2;
pub const OEXEC: u8 = 3;
pub const OTRUNC: u8 = 0x10;
pub const ORCLOSE: u8 = 0x40;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated frame")]
    Truncated,

    #[error("unsupported message type {0}")]
    Unsupported(u8),

    #[error("invalid utf8 in string field")]
    InvalidUtf8,

    #[error("length mismatch: declared {declared} actual {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("invalid path component")]
    InvalidPath,

    #[error("field too long for the wire")]
    TooLong,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    Tversion = 100,
    Rversion = 101,
    Tauth = 102,
    Rauth = 103,
    Tattach = 104,
    Rattach = 105,
    Rerror = 107,
    Tflush = 108,
    Rflush = 109,
    Twalk = 110,
    Rwalk = 111,
    Topen = 112,
    Ropen = 113,
    Tcreate = 114,
    Rcreate = 115,
    Tread = 116,
    Rread = 117,
    Twrite = 118,
    Rwrite = 119,
    Tclunk = 120,
    Rclunk = 121,
    Tremove = 122,
    Rremove = 123,
    Tstat = 124,
    Rstat = 125,
    Twstat = 126,
    Rwstat = 127,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageType::*;
        Ok(match value {
            100 => Tversion,
            101 => Rversion,
            102 => Tauth,
            103 => Rauth,
            104 => Tattach,
            105 => Rattach,
            107 => Rerror,
            108 => Tflush,
            109 => Rflush,
            110 => Twalk,
            111 => Rwalk,
            112 => Topen,
            113 => Ropen,
            114 => Tcreate,
            115 => Rcreate,
            116 => Tread,
            117 => Rread,
            118 => Twrite,
            119 => Rwrite,
            120 => Tclunk,
            121 => Rclunk,
            122 => Tremove,
            123 => Rremove,
            124 => Tstat,
            125 => Rstat,
            126 => Twstat,
            127 => Rwstat,
            other => return Err(CodecError::Unsupported(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qid {
    pub ty: u8,
    pub version: u32,
    pub path: u64,
}

/// Directory entry as carried by Rstat, Twstat and directory reads.
///
/// In a Twstat every field may hold its "don't touch" value: all ones for
/// integers, empty for strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireStat {
    pub ty: u16,
    pub dev: u32,
    pub qid: Qid,
    pub mode: u32,
    pub atime: u32,
    pub mtime: u32,
    pub length: u64,
    pub name: String,
    pub uid: String,
    pub gid: String,
    pub muid: String,
}

impl WireStat {
    /// A Twstat template touching nothing.
    pub fn unchanged() -> Self {
        Self {
            ty: u16::MAX,
            dev: u32::MAX,
            qid: Qid {
                ty: u8::MAX,
                version: u32::MAX,
                path: u64::MAX,
            },
            mode: u32::MAX,
            atime: u32::MAX,
            mtime: u32::MAX,
            length: u64::MAX,
            name: String::new(),
            uid: String::new(),
            gid: String::new(),
            muid: String::new(),
        }
    }

    /// Encoded form, leading size included.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut body = BytesMut::new();
        body.put_u16_le(self.ty);
        body.put_u32_le(self.dev);
        put_qid(&mut body, &self.qid);
        body.put_u32_le(self.mode);
        body.put_u32_le(self.atime);
        body.put_u32_le(self.mtime);
        body.put_u64_le(self.length);
        for s in [&self.name, &self.uid, &self.gid, &self.muid] {
            put_string(&mut body, s)?;
        }
        let size: u16 = body.len().try_into().map_err(|_| CodecError::TooLong)?;
        let mut out = Vec::with_capacity(body.len() + 2);
        out.put_u16_le(size);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let size = reader.u16()? as usize;
        let mut inner = reader.sub(size)?;
        Ok(Self {
            ty: inner.u16()?,
            dev: inner.u32()?,
            qid: inner.qid()?,
            mode: inner.u32()?,
            atime: inner.u32()?,
            mtime: inner.u32()?,
            length: inner.u64()?,
            name: inner.string()?,
            uid: inner.string()?,
            gid: inner.string()?,
            muid: inner.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub tag: u16,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Version { msize: u32, version: String },
    Auth { afid: u32, uname: String, aname: String },
    Attach { fid: u32, afid: u32, uname: String, aname: String },
    Flush { oldtag: u16 },
    Walk { fid: u32, newfid: u32, wnames: Vec<String> },
    Open { fid: u32, mode: u8 },
    Create { fid: u32, name: String, perm: u32, mode: u8 },
    Read { fid: u32, offset: u64, count: u32 },
    Write { fid: u32, offset: u64, data: Vec<u8> },
    Clunk { fid: u32 },
    Remove { fid: u32 },
    Stat { fid: u32 },
    Wstat { fid: u32, stat: WireStat },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub tag: u16,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Version { msize: u32, version: String },
    Attach { qid: Qid },
    Error { ename: String },
    Flush,
    Walk { qids: Vec<Qid> },
    Open { qid: Qid, iounit: u32 },
    Read { data: Vec<u8> },
    Write { count: u32 },
    Clunk,
    Remove,
    Stat { stat: WireStat },
    Wstat,
}

/// Tag of a frame, if the header is intact. Lets a server answer a request
/// it could not decode.
pub fn peek_tag(frame: &[u8]) -> Option<u16> {
    frame.get(5..7).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

pub fn decode_request(frame: &[u8]) -> Result<Request, CodecError> {
    let (ty, mut reader) = open_frame(frame)?;
    let tag = reader.u16()?;
    let body = match ty {
        MessageType::Tversion => RequestBody::Version {
            msize: reader.u32()?,
            version: reader.string()?,
        },
        MessageType::Tauth => RequestBody::Auth {
            afid: reader.u32()?,
            uname: reader.string()?,
            aname: reader.string()?,
        },
        MessageType::Tattach => RequestBody::Attach {
            fid: reader.u32()?,
            afid: reader.u32()?,
            uname: reader.string()?,
            aname: reader.string()?,
        },
        MessageType::Tflush => RequestBody::Flush {
            oldtag: reader.u16()?,
        },
        MessageType::Twalk => {
            let fid = reader.u32()?;
            let newfid = reader.u32()?;
            let count = reader.u16()? as usize;
            if count > MAX_WALK_ELEMENTS {
                return Err(CodecError::InvalidPath);
            }
            let mut wnames = Vec::with_capacity(count);
            for _ in 0..count {
                let name = reader.string()?;
                validate_component(&name)?;
                wnames.push(name);
            }
            RequestBody::Walk {
                fid,
                newfid,
                wnames,
            }
        }
        MessageType::Topen => RequestBody::Open {
            fid: reader.u32()?,
            mode: reader.u8()?,
        },
        MessageType::Tcreate => RequestBody::Create {
            fid: reader.u32()?,
            name: reader.string()?,
            perm: reader.u32()?,
            mode: reader.u8()?,
        },
        MessageType::Tread => RequestBody::Read {
            fid: reader.u32()?,
            offset: reader.u64()?,
            count: reader.u32()?,
        },
        MessageType::Twrite => {
            let fid = reader.u32()?;
            let offset = reader.u64()?;
            let count = reader.u32()? as usize;
            RequestBody::Write {
                fid,
                offset,
                data: reader.bytes(count)?.to_vec(),
            }
        }
        MessageType::Tclunk => RequestBody::Clunk { fid: reader.u32()? },
        MessageType::Tremove => RequestBody::Remove { fid: reader.u32()? },
        MessageType::Tstat => RequestBody::Stat { fid: reader.u32()? },
        MessageType::Twstat => {
            let fid = reader.u32()?;
            let n = reader.u16()? as usize;
            let mut inner = reader.sub(n)?;
            RequestBody::Wstat {
                fid,
                stat: WireStat::decode(&mut inner)?,
            }
        }
        other => return Err(CodecError::Unsupported(other as u8)),
    };
    Ok(Request { tag, body })
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, CodecError> {
    let mut payload = BytesMut::new();
    payload.put_u16_le(response.tag);
    let ty = match &response.body {
        ResponseBody::Version { msize, version } => {
            payload.put_u32_le(*msize);
            put_string(&mut payload, version)?;
            MessageType::Rversion
        }
        ResponseBody::Attach { qid } => {
            put_qid(&mut payload, qid);
            MessageType::Rattach
        }
        ResponseBody::Error { ename } => {
            put_string(&mut payload, ename)?;
            MessageType::Rerror
        }
        ResponseBody::Flush => MessageType::Rflush,
        ResponseBody::Walk { qids } => {
            let count: u16 = qids.len().try_into().map_err(|_| CodecError::TooLong)?;
            payload.put_u16_le(count);
            for qid in qids {
                put_qid(&mut payload, qid);
            }
            MessageType::Rwalk
        }
        ResponseBody::Open { qid, iounit } => {
            put_qid(&mut payload, qid);
            payload.put_u32_le(*iounit);
            MessageType::Ropen
        }
        ResponseBody::Read { data } => {
            put_data(&mut payload, data)?;
            MessageType::Rread
        }
        ResponseBody::Write { count } => {
            payload.put_u32_le(*count);
            MessageType::Rwrite
        }
        ResponseBody::Clunk => MessageType::Rclunk,
        ResponseBody::Remove => MessageType::Rremove,
        ResponseBody::Stat { stat } => {
            let encoded = stat.encode()?;
            let n: u16 = encoded.len().try_into().map_err(|_| CodecError::TooLong)?;
            payload.put_u16_le(n);
            payload.extend_from_slice(&encoded);
            MessageType::Rstat
        }
        ResponseBody::Wstat => MessageType::Rwstat,
    };
    Ok(finish(ty, &payload))
}

#[cfg(test)]
pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    let mut payload = BytesMut::new();
    payload.put_u16_le(request.tag);
    let ty = match &request.body {
        RequestBody::Version { msize, version } => {
            payload.put_u32_le(*msize);
            put_string(&mut payload, version)?;
            MessageType::Tversion
        }
        RequestBody::Auth { afid, uname, aname } => {
            payload.put_u32_le(*afid);
            put_string(&mut payload, uname)?;
            put_string(&mut payload, aname)?;
            MessageType::Tauth
        }
        RequestBody::Attach {
            fid,
            afid,
            uname,
            aname,
        } => {
            payload.put_u32_le(*fid);
            payload.put_u32_le(*afid);
            put_string(&mut payload, uname)?;
            put_string(&mut payload, aname)?;
            MessageType::Tattach
        }
        RequestBody::Flush { oldtag } => {
            payload.put_u16_le(*oldtag);
            MessageType::Tflush
        }
        RequestBody::Walk {
            fid,
            newfid,
            wnames,
        } => {
            payload.put_u32_le(*fid);
            payload.put_u32_le(*newfid);
            if wnames.len() > MAX_WALK_ELEMENTS {
                return Err(CodecError::InvalidPath);
            }
            payload.put_u16_le(wnames.len() as u16);
            for name in wnames {
                validate_component(name)?;
                put_string(&mut payload, name)?;
            }
            MessageType::Twalk
        }
        RequestBody::Open { fid, mode } => {
            payload.put_u32_le(*fid);
            payload.put_u8(*mode);
            MessageType::Topen
        }
        RequestBody::Create {
            fid,
            name,
            perm,
            mode,
        } => {
            payload.put_u32_le(*fid);
            put_string(&mut payload, name)?;
            payload.put_u32_le(*perm);
            payload.put_u8(*mode);
            MessageType::Tcreate
        }
        RequestBody::Read { fid, offset, count } => {
            payload.put_u32_le(*fid);
            payload.put_u64_le(*offset);
            payload.put_u32_le(*count);
            MessageType::Tread
        }
        RequestBody::Write { fid, offset, data } => {
            payload.put_u32_le(*fid);
            payload.put_u64_le(*offset);
            put_data(&mut payload, data)?;
            MessageType::Twrite
        }
        RequestBody::Clunk { fid } => {
            payload.put_u32_le(*fid);
            MessageType::Tclunk
        }
        RequestBody::Remove { fid } => {
            payload.put_u32_le(*fid);
            MessageType::Tremove
        }
        RequestBody::Stat { fid } => {
            payload.put_u32_le(*fid);
            MessageType::Tstat
        }
        RequestBody::Wstat { fid, stat } => {
            payload.put_u32_le(*fid);
            let encoded = stat.encode()?;
            payload.put_u16_le(encoded.len() as u16);
            payload.extend_from_slice(&encoded);
            MessageType::Twstat
        }
    };
    Ok(finish(ty, &payload))
}

#[cfg(test)]
pub fn decode_response(frame: &[u8]) -> Result<Response, CodecError> {
    let (ty, mut reader) = open_frame(frame)?;
    let tag = reader.u16()?;
    let body = match ty {
        MessageType::Rversion => ResponseBody::Version {
            msize: reader.u32()?,
            version: reader.string()?,
        },
        MessageType::Rattach => ResponseBody::Attach { qid: reader.qid()? },
        MessageType::Rerror => ResponseBody::Error {
            ename: reader.string()?,
        },
        MessageType::Rflush => ResponseBody::Flush,
        MessageType::Rwalk => {
            let count = reader.u16()? as usize;
            let mut qids = Vec::with_capacity(count);
            for _ in 0..count {
                qids.push(reader.qid()?);
            }
            ResponseBody::Walk { qids }
        }
        MessageType::Ropen => ResponseBody::Open {
            qid: reader.qid()?,
            iounit: reader.u32()?,
        },
        MessageType::Rread => {
            let count = reader.u32()? as usize;
            ResponseBody::Read {
                data: reader.bytes(count)?.to_vec(),
            }
        }
        MessageType::Rwrite => ResponseBody::Write {
            count: reader.u32()?,
        },
        MessageType::Rclunk => ResponseBody::Clunk,
        MessageType::Rremove => ResponseBody::Remove,
        MessageType::Rstat => {
            let n = reader.u16()? as usize;
            let mut inner = reader.sub(n)?;
            ResponseBody::Stat {
                stat: WireStat::decode(&mut inner)?,
            }
        }
        MessageType::Rwstat => ResponseBody::Wstat,
        other => return Err(CodecError::Unsupported(other as u8)),
    };
    Ok(Response { tag, body })
}

/// Split the entries packed into a directory read.
#[cfg(test)]
pub fn decode_stats(mut data: &[u8]) -> Result<Vec<WireStat>, CodecError> {
    let mut stats = Vec::new();
    while !data.is_empty() {
        let mut reader = Reader(data);
        stats.push(WireStat::decode(&mut reader)?);
        data = reader.0;
    }
    Ok(stats)
}

fn finish(ty: MessageType, payload: &[u8]) -> Vec<u8> {
    let size = payload.len() + 5;
    let mut buffer = Vec::with_capacity(size);
    buffer.put_u32_le(size as u32);
    buffer.put_u8(ty as u8);
    buffer.extend_from_slice(payload);
    buffer
}

fn open_frame(frame: &[u8]) -> Result<(MessageType, Reader<'_>), CodecError> {
    if frame.len() < 5 {
        return Err(CodecError::Truncated);
    }
    let declared = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if declared as usize != frame.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }
    let ty = MessageType::try_from(frame[4])?;
    Ok((ty, Reader(&frame[5..])))
}

fn validate_component(component: &str) -> Result<(), CodecError> {
    if component.is_empty() || component.contains('/') {
        return Err(CodecError::InvalidPath);
    }
    Ok(())
}

fn put_qid(buffer: &mut impl BufMut, qid: &Qid) {
    buffer.put_u8(qid.ty);
    buffer.put_u32_le(qid.version);
    buffer.put_u64_le(qid.path);
}

fn put_string(buffer: &mut impl BufMut, value: &str) -> Result<(), CodecError> {
    let len: u16 = value.len().try_into().map_err(|_| CodecError::TooLong)?;
    buffer.put_u16_le(len);
    buffer.put_slice(value.as_bytes());
    Ok(())
}

fn put_data(buffer: &mut impl BufMut, data: &[u8]) -> Result<(), CodecError> {
    let count: u32 = data.len().try_into().map_err(|_| CodecError::TooLong)?;
    buffer.put_u32_le(count);
    buffer.put_slice(data);
    Ok(())
}

/// Bounds-checked reads over a frame body.
struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn need(&self, n: usize) -> Result<(), CodecError> {
        if self.0.remaining() < n {
            return Err(CodecError::Truncated);
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        self.need(1)?;
        Ok(self.0.get_u8())
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        self.need(2)?;
        Ok(self.0.get_u16_le())
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.need(4)?;
        Ok(self.0.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        self.need(8)?;
        Ok(self.0.get_u64_le())
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.need(n)?;
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        Ok(head)
    }

    fn sub(&mut self, n: usize) -> Result<Reader<'a>, CodecError> {
        Ok(Reader(self.bytes(n)?))
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    fn qid(&mut self) -> Result<Qid, CodecError> {
        Ok(Qid {
            ty: self.u8()?,
            version: self.u32()?,
            path: self.u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_frame_layout() {
        let frame = encode_response(&Response {
            tag: NOTAG,
            body: ResponseBody::Version {
                msize: 8192,
                version: VERSION.to_string(),
            },
        })
        .unwrap();
        assert_eq!(frame.len(), 4 + 1 + 2 + 4 + 2 + 6);
        assert_eq!(&frame[..4], &(frame.len() as u32).to_le_bytes());
        assert_eq!(frame[4], 101);
        assert_eq!(&frame[5..7], &[0xff, 0xff]);
        assert_eq!(&frame[13..], b"9P2000");
    }

    #[test]
    fn decodes_what_a_client_sends() {
        let requests = [
            RequestBody::Attach {
                fid: 1,
                afid: NOFID,
                uname: "glenda".into(),
                aname: String::new(),
            },
            RequestBody::Walk {
                fid: 1,
                newfid: 2,
                wnames: vec!["ann".into(), "1700000000.txt".into()],
            },
            RequestBody::Write {
                fid: 2,
                offset: 9,
                data: b"sure\n".to_vec(),
            },
            RequestBody::Wstat {
                fid: 2,
                stat: WireStat {
                    length: 0,
                    ..WireStat::unchanged()
                },
            },
        ];
        for body in requests {
            let request = Request { tag: 3, body };
            let frame = encode_request(&request).unwrap();
            assert_eq!(decode_request(&frame).unwrap(), request);
        }
    }

    #[test]
    fn rejects_bad_walks() {
        let request = Request {
            tag: 1,
            body: RequestBody::Walk {
                fid: 1,
                newfid: 2,
                wnames: vec!["a".into()],
            },
        };
        let mut frame = encode_request(&request).unwrap();
        // Claim more names than the limit.
        frame[15] = 17;
        assert_eq!(decode_request(&frame), Err(CodecError::InvalidPath));

        let slash = Request {
            tag: 1,
            body: RequestBody::Walk {
                fid: 1,
                newfid: 2,
                wnames: vec!["a/b".into()],
            },
        };
        assert_eq!(encode_request(&slash), Err(CodecError::InvalidPath));
    }

    #[test]
    fn detects_truncation_and_bad_sizes() {
        let frame = encode_request(&Request {
            tag: 1,
            body: RequestBody::Read {
                fid: 1,
                offset: 0,
                count: 10,
            },
        })
        .unwrap();
        assert!(matches!(
            decode_request(&frame[..frame.len() - 1]),
            Err(CodecError::LengthMismatch { .. })
        ));

        let mut short = frame.clone();
        short.truncate(12);
        short[..4].copy_from_slice(&12u32.to_le_bytes());
        assert_eq!(decode_request(&short), Err(CodecError::Truncated));

        let mut unknown = frame;
        unknown[4] = 106;
        assert_eq!(decode_request(&unknown), Err(CodecError::Unsupported(106)));
        assert_eq!(peek_tag(&unknown), Some(1));
    }

    #[test]
    fn directory_entries_pack_back_to_back() {
        let entry = |name: &str| WireStat {
            ty: 0,
            dev: 0,
            qid: Qid {
                ty: QTFILE,
                version: 0,
                path: 7,
            },
            mode: 0o600,
            atime: 1,
            mtime: 2,
            length: 3,
            name: name.to_string(),
            uid: "u".into(),
            gid: "g".into(),
            muid: "m".into(),
        };
        let mut packed = entry("in").encode().unwrap();
        packed.extend(entry("out").encode().unwrap());
        let names: Vec<_> = decode_stats(&packed)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["in", "out"]);
    }
}
