//! 9P2000 sessions over any byte stream.
//!
//! Each request other than Tversion and Tflush runs in its own task so
//! that a read blocked on an `out` log never stalls the connection. Tflush
//! aborts the task of the flushed tag. A task replies only while its tag
//! is still registered, checked under the same lock Tflush takes, so no
//! reply ever follows the Rflush for its tag. When the connection ends
//! every task is aborted and every fid clunked.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use chatfs_fs::{ChatFs, Entry, Stat, StatChange};

use super::codec::{
    decode_request, encode_response, peek_tag, Qid, Request, RequestBody, Response,
    ResponseBody, WireStat, DMDIR, NOFID, NOTAG, OEXEC, OREAD, ORCLOSE, ORDWR, OTRUNC, OWRITE,
    QTDIR, QTFILE, READ_OVERHEAD, VERSION,
};
use crate::error::{RequestError, ServerError};

/// Largest message size offered to clients.
pub const MAX_MSIZE: u32 = 64 * 1024;

/// Smallest message size that still leaves room for useful reads.
const MIN_MSIZE: u32 = 256;

type RequestResult = Result<ResponseBody, RequestError>;

/// Accept connections forever, one session each.
pub async fn serve(listener: TcpListener, fs: Arc<ChatFs>, owner: String) -> Result<(), ServerError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "9P client connected");
        let session = Session::new(fs.clone(), owner.clone());
        tokio::spawn(async move {
            if let Err(e) = session.run(stream).await {
                warn!(%peer, error = %e, "9P session failed");
            }
            info!(%peer, "9P client disconnected");
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Fids
// ---------------------------------------------------------------------------

struct DirCursor {
    /// Stats snapshotted when the listing started at offset zero.
    entries: Vec<Vec<u8>>,
    next_index: usize,
    next_offset: u64,
}

struct OpenFid {
    mode: u8,
    listing: Option<DirCursor>,
}

impl OpenFid {
    fn can_read(&self) -> bool {
        matches!(self.mode & 3, OREAD | ORDWR | OEXEC)
    }

    fn can_write(&self) -> bool {
        matches!(self.mode & 3, OWRITE | ORDWR)
    }
}

struct Fid {
    entry: Arc<Entry>,
    open: Option<OpenFid>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A request task registered under its tag.
struct InFlight {
    /// Distinguishes a reused tag from the request that first held it.
    generation: u64,
    task: AbortHandle,
}

pub struct Session {
    fs: Arc<ChatFs>,
    owner: String,
    msize: AtomicU32,
    fids: Mutex<HashMap<u32, Fid>>,
    inflight: Mutex<HashMap<u16, InFlight>>,
    next_generation: AtomicU64,
}

impl Session {
    pub fn new(fs: Arc<ChatFs>, owner: String) -> Arc<Self> {
        Arc::new(Self {
            fs,
            owner,
            msize: AtomicU32::new(0),
            fids: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    /// Serve requests from `stream` until it closes.
    pub async fn run<S>(self: Arc<Self>, stream: S) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (replies, mut outgoing) = mpsc::unbounded_channel::<Vec<u8>>();

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outgoing.recv().await {
                writer.write_all(&frame).await?;
                writer.flush().await?;
            }
            Ok::<_, io::Error>(())
        });

        let result = self.read_loop(&mut reader, &replies).await;
        self.teardown();
        drop(replies);
        if let Ok(Err(e)) = writer_task.await {
            debug!(error = %e, "9P writer stopped");
        }
        result
    }

    async fn read_loop<R>(
        self: &Arc<Self>,
        reader: &mut R,
        replies: &mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
    {
        while let Some(frame) = read_frame(reader, self.frame_limit()).await? {
            let request = match decode_request(&frame) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Undecodable 9P request");
                    match peek_tag(&frame) {
                        Some(tag) => send(replies, tag, Err(e.into())),
                        None => return Err(e.into()),
                    }
                    continue;
                }
            };
            self.dispatch(request, replies);
        }
        Ok(())
    }

    fn frame_limit(&self) -> u32 {
        match self.msize.load(Ordering::Acquire) {
            0 => MAX_MSIZE,
            negotiated => negotiated,
        }
    }

    fn dispatch(self: &Arc<Self>, request: Request, replies: &mpsc::UnboundedSender<Vec<u8>>) {
        let Request { tag, body } = request;
        match body {
            RequestBody::Version { msize, version } => {
                if tag != NOTAG {
                    debug!(tag, "Tversion sent with a tag");
                }
                send(replies, tag, Ok(self.version(msize, &version)));
            }
            RequestBody::Flush { oldtag } => {
                if let Some(request) = lock(&self.inflight).remove(&oldtag) {
                    request.task.abort();
                    debug!(oldtag, "9P request flushed");
                }
                send(replies, tag, Ok(ResponseBody::Flush));
            }
            body if self.msize.load(Ordering::Acquire) == 0 => {
                debug!(?body, "Request before version negotiation");
                send(replies, tag, Err(RequestError::NoVersion));
            }
            body => {
                let session = self.clone();
                let replies = replies.clone();
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                // The table lock is held across the spawn so the task cannot
                // look itself up before it is registered.
                let mut inflight = lock(&self.inflight);
                let task = tokio::spawn(async move {
                    let result = session.handle(body).await;
                    let mut inflight = lock(&session.inflight);
                    if inflight.get(&tag).is_some_and(|r| r.generation == generation) {
                        inflight.remove(&tag);
                        send(&replies, tag, result);
                    } else {
                        debug!(tag, "Reply to a flushed request dropped");
                    }
                });
                inflight.insert(
                    tag,
                    InFlight {
                        generation,
                        task: task.abort_handle(),
                    },
                );
            }
        }
    }

    fn version(&self, client_msize: u32, client_version: &str) -> ResponseBody {
        self.teardown();
        let msize = client_msize.min(MAX_MSIZE);
        let version = if client_version.starts_with(VERSION) && msize >= MIN_MSIZE {
            self.msize.store(msize, Ordering::Release);
            VERSION
        } else {
            self.msize.store(0, Ordering::Release);
            "unknown"
        };
        info!(msize, version, "9P version negotiated");
        ResponseBody::Version {
            msize,
            version: version.to_string(),
        }
    }

    /// Abort every request in flight and clunk every fid.
    fn teardown(&self) {
        for (_, request) in lock(&self.inflight).drain() {
            request.task.abort();
        }
        let fids: Vec<Fid> = lock(&self.fids).drain().map(|(_, fid)| fid).collect();
        for fid in fids {
            if let Err(e) = self.release(fid) {
                debug!(error = %e, "Release during teardown failed");
            }
        }
    }

    /// Drop a fid, running deferred node effects if it was open.
    fn release(&self, fid: Fid) -> Result<(), RequestError> {
        let Some(open) = fid.open else {
            return Ok(());
        };
        let clunked = self.fs.clunk(&fid.entry);
        if open.mode & ORCLOSE != 0 {
            self.fs.remove(&fid.entry)?;
        }
        clunked.map_err(|e| {
            warn!(name = %fid.entry.name(), error = %e, "Clunk failed");
            e.into()
        })
    }

    async fn handle(&self, body: RequestBody) -> RequestResult {
        match body {
            RequestBody::Auth { .. } => Err(RequestError::NoAuthRequired),
            RequestBody::Attach { afid, .. } if afid != NOFID => Err(RequestError::NoAuthRequired),
            RequestBody::Attach { fid, uname, .. } => self.attach(fid, &uname),
            RequestBody::Walk {
                fid,
                newfid,
                wnames,
            } => self.walk(fid, newfid, &wnames),
            RequestBody::Open { fid, mode } => self.open(fid, mode),
            RequestBody::Create { .. } => Err(RequestError::CreateProhibited),
            RequestBody::Read { fid, offset, count } => self.read(fid, offset, count).await,
            RequestBody::Write { fid, offset, data } => self.write(fid, offset, &data),
            RequestBody::Clunk { fid } => self.clunk(fid),
            RequestBody::Remove { fid } => self.remove(fid),
            RequestBody::Stat { fid } => {
                let entry = self.entry(fid)?;
                Ok(ResponseBody::Stat {
                    stat: self.wire_stat(&self.fs.stat(&entry)),
                })
            }
            RequestBody::Wstat { fid, stat } => self.wstat(fid, &stat),
            RequestBody::Version { .. } | RequestBody::Flush { .. } => {
                Err(RequestError::Unexpected)
            }
        }
    }

    fn entry(&self, fid: u32) -> Result<Arc<Entry>, RequestError> {
        lock(&self.fids)
            .get(&fid)
            .map(|f| f.entry.clone())
            .ok_or(RequestError::UnknownFid)
    }

    fn attach(&self, fid: u32, uname: &str) -> RequestResult {
        let root = self.fs.root();
        let qid = qid(&root.stat());
        let mut fids = lock(&self.fids);
        if fids.contains_key(&fid) {
            return Err(RequestError::FidInUse);
        }
        fids.insert(
            fid,
            Fid {
                entry: root,
                open: None,
            },
        );
        debug!(fid, uname, "9P attach");
        Ok(ResponseBody::Attach { qid })
    }

    fn walk(&self, fid: u32, newfid: u32, wnames: &[String]) -> RequestResult {
        let start = {
            let fids = lock(&self.fids);
            let source = fids.get(&fid).ok_or(RequestError::UnknownFid)?;
            if source.open.is_some() {
                return Err(RequestError::AlreadyOpen);
            }
            if newfid != fid && fids.contains_key(&newfid) {
                return Err(RequestError::FidInUse);
            }
            source.entry.clone()
        };

        let mut current = start;
        let mut qids = Vec::with_capacity(wnames.len());
        for name in wnames {
            if !current.is_dir() {
                if qids.is_empty() {
                    return Err(RequestError::NotADirectory);
                }
                break;
            }
            let next = if name == ".." {
                Some(current.parent().unwrap_or_else(|| current.clone()))
            } else {
                current.child(name)
            };
            match next {
                Some(next) => {
                    qids.push(qid(&next.stat()));
                    current = next;
                }
                None if qids.is_empty() => return Err(RequestError::NotFound),
                None => break,
            }
        }

        if qids.len() == wnames.len() {
            lock(&self.fids).insert(
                newfid,
                Fid {
                    entry: current,
                    open: None,
                },
            );
        }
        Ok(ResponseBody::Walk { qids })
    }

    fn open(&self, fid: u32, mode: u8) -> RequestResult {
        let mut fids = lock(&self.fids);
        let target = fids.get_mut(&fid).ok_or(RequestError::UnknownFid)?;
        if target.open.is_some() {
            return Err(RequestError::AlreadyOpen);
        }

        let entry = target.entry.clone();
        let stat = entry.stat();
        let open = OpenFid {
            mode,
            listing: None,
        };
        let wants_write = open.can_write() || mode & OTRUNC != 0;
        if (open.can_read() && stat.permissions & 0o400 == 0)
            || (wants_write && (stat.is_dir || stat.permissions & 0o200 == 0))
        {
            return Err(RequestError::PermissionDenied);
        }
        if mode & OTRUNC != 0 {
            self.fs.write_stat(&entry, StatChange::truncate())?;
        }

        self.fs.open(&entry);
        target.open = Some(open);
        Ok(ResponseBody::Open {
            qid: qid(&stat),
            iounit: self.iounit(),
        })
    }

    fn iounit(&self) -> u32 {
        self.frame_limit().saturating_sub(READ_OVERHEAD)
    }

    async fn read(&self, fid: u32, offset: u64, count: u32) -> RequestResult {
        let count = count.min(self.iounit()) as usize;
        let entry = {
            let mut fids = lock(&self.fids);
            let target = fids.get_mut(&fid).ok_or(RequestError::UnknownFid)?;
            let open = target
                .open
                .as_mut()
                .filter(|open| open.can_read())
                .ok_or(RequestError::NotOpen("reading"))?;
            if target.entry.is_dir() {
                let data = self.read_dir(&target.entry, open, offset, count)?;
                return Ok(ResponseBody::Read { data });
            }
            target.entry.clone()
        };
        let data = self.fs.read(&entry, offset, count).await?;
        Ok(ResponseBody::Read { data })
    }

    /// Directory reads return whole entries and must continue where the
    /// previous read stopped, or restart at zero.
    fn read_dir(
        &self,
        dir: &Entry,
        open: &mut OpenFid,
        offset: u64,
        count: usize,
    ) -> Result<Vec<u8>, RequestError> {
        if offset == 0 {
            let mut entries = Vec::new();
            for child in dir.children() {
                entries.push(self.wire_stat(&child.stat()).encode()?);
            }
            open.listing = Some(DirCursor {
                entries,
                next_index: 0,
                next_offset: 0,
            });
        }
        let cursor = open
            .listing
            .as_mut()
            .filter(|cursor| cursor.next_offset == offset)
            .ok_or(RequestError::BadDirectoryOffset)?;

        let mut data = Vec::new();
        while let Some(entry) = cursor.entries.get(cursor.next_index) {
            if data.len() + entry.len() > count {
                break;
            }
            data.extend_from_slice(entry);
            cursor.next_index += 1;
        }
        cursor.next_offset += data.len() as u64;
        Ok(data)
    }

    fn write(&self, fid: u32, offset: u64, data: &[u8]) -> RequestResult {
        let entry = {
            let fids = lock(&self.fids);
            let target = fids.get(&fid).ok_or(RequestError::UnknownFid)?;
            if !target.open.as_ref().is_some_and(OpenFid::can_write) {
                return Err(RequestError::NotOpen("writing"));
            }
            target.entry.clone()
        };
        let count = self.fs.write(&entry, offset, data)?;
        Ok(ResponseBody::Write {
            count: count as u32,
        })
    }

    fn clunk(&self, fid: u32) -> RequestResult {
        let removed = lock(&self.fids).remove(&fid);
        let fid = removed.ok_or(RequestError::UnknownFid)?;
        self.release(fid)?;
        Ok(ResponseBody::Clunk)
    }

    /// The fid is clunked whether or not the remove succeeds.
    fn remove(&self, fid: u32) -> RequestResult {
        let removed = lock(&self.fids).remove(&fid);
        let mut fid = removed.ok_or(RequestError::UnknownFid)?;
        let result = self.fs.remove(&fid.entry);
        if let Some(open) = fid.open.as_mut() {
            open.mode &= !ORCLOSE;
        }
        if let Err(e) = self.release(fid) {
            debug!(error = %e, "Clunk after remove failed");
        }
        result?;
        Ok(ResponseBody::Remove)
    }

    fn wstat(&self, fid: u32, stat: &WireStat) -> RequestResult {
        let entry = self.entry(fid)?;
        if !stat.name.is_empty() && stat.name != entry.name() {
            return Err(RequestError::RenameNotSupported);
        }
        let change = StatChange {
            length: (stat.length != u64::MAX).then_some(stat.length),
        };
        self.fs.write_stat(&entry, change)?;
        Ok(ResponseBody::Wstat)
    }

    fn wire_stat(&self, stat: &Stat) -> WireStat {
        let mut mode = stat.permissions;
        if stat.is_dir {
            mode |= DMDIR;
        }
        WireStat {
            ty: 0,
            dev: 0,
            qid: qid(stat),
            mode,
            atime: stat.atime,
            mtime: stat.mtime,
            length: if stat.is_dir { 0 } else { stat.length },
            name: stat.name.clone(),
            uid: self.owner.clone(),
            gid: self.owner.clone(),
            muid: self.owner.clone(),
        }
    }
}

fn qid(stat: &Stat) -> Qid {
    Qid {
        ty: if stat.is_dir { QTDIR } else { QTFILE },
        version: 0,
        path: stat.qid_path,
    }
}

fn send(replies: &mpsc::UnboundedSender<Vec<u8>>, tag: u16, result: RequestResult) {
    let body = result.unwrap_or_else(|e| ResponseBody::Error {
        ename: e.to_string(),
    });
    match encode_response(&Response { tag, body }) {
        Ok(frame) => {
            // A closed queue means the connection is gone.
            let _ = replies.send(frame);
        }
        Err(e) => warn!(tag, error = %e, "Failed to encode 9P response"),
    }
}

/// Read one frame, or `None` on a clean end of stream.
async fn read_frame<R>(reader: &mut R, limit: u32) -> Result<Option<BytesMut>, ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut size = [0u8; 4];
    match reader.read_exact(&mut size).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let declared = u32::from_le_bytes(size);
    if declared < 7 || declared > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("9P frame of {declared} bytes outside 7..={limit}"),
        )
        .into());
    }
    let mut frame = BytesMut::zeroed(declared as usize);
    frame[..4].copy_from_slice(&size);
    reader.read_exact(&mut frame[4..]).await?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    use chatfs_fs::Times;
    use chatfs_shared::{BackendCommand, ChatId, MessageId};
    use chatfs_store::{Database, MessageRecord};

    use super::*;
    use crate::ninep::codec::{decode_response, decode_stats, encode_request};

    struct Client {
        stream: DuplexStream,
        next_tag: u16,
    }

    impl Client {
        async fn send(&mut self, tag: u16, body: RequestBody) {
            let frame = encode_request(&Request { tag, body }).unwrap();
            self.stream.write_all(&frame).await.unwrap();
        }

        async fn recv(&mut self) -> Response {
            let read = async {
                let mut size = [0u8; 4];
                self.stream.read_exact(&mut size).await.unwrap();
                let mut frame = vec![0u8; u32::from_le_bytes(size) as usize];
                frame[..4].copy_from_slice(&size);
                self.stream.read_exact(&mut frame[4..]).await.unwrap();
                decode_response(&frame).unwrap()
            };
            timeout(Duration::from_secs(2), read).await.unwrap()
        }

        async fn call(&mut self, body: RequestBody) -> ResponseBody {
            self.next_tag += 1;
            let tag = self.next_tag;
            self.send(tag, body).await;
            let response = self.recv().await;
            assert_eq!(response.tag, tag);
            response.body
        }

        async fn walk(&mut self, newfid: u32, path: &[&str]) -> ResponseBody {
            self.call(RequestBody::Walk {
                fid: 1,
                newfid,
                wnames: path.iter().map(|s| s.to_string()).collect(),
            })
            .await
        }

        async fn open(&mut self, fid: u32, mode: u8) -> ResponseBody {
            self.call(RequestBody::Open { fid, mode }).await
        }

        async fn read(&mut self, fid: u32, offset: u64, count: u32) -> ResponseBody {
            self.call(RequestBody::Read { fid, offset, count }).await
        }
    }

    fn record(id: i64, seconds: i64, text: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId(id),
            chat_id: ChatId(42),
            sent_at: Utc.timestamp_opt(seconds, 0).unwrap(),
            sender: "ann".to_string(),
            quoted_text: String::new(),
            text: text.to_string(),
            is_outgoing: false,
        }
    }

    fn add_message(fs: &ChatFs, record: &MessageRecord) {
        fs.context()
            .update(|tx| {
                tx.put_chat("ann", record.chat_id)?;
                Ok(tx.put_message(record)?)
            })
            .unwrap();
        let dir = fs.tree().ensure_chat("ann", record.chat_id, Times::default());
        fs.materialize(&dir, record);
    }

    /// A session with one chat holding one message, version negotiated and
    /// the root attached as fid 1.
    async fn connect() -> (
        Client,
        Arc<ChatFs>,
        mpsc::UnboundedReceiver<BackendCommand>,
    ) {
        let (commands, rx) = mpsc::unbounded_channel();
        let fs = Arc::new(ChatFs::new(Database::open_in_memory().unwrap(), commands));
        add_message(&fs, &record(7, 100, "hello"));

        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        tokio::spawn(Session::new(fs.clone(), "glenda".to_string()).run(server_end));

        let mut client = Client {
            stream: client_end,
            next_tag: 0,
        };
        client.send(NOTAG, RequestBody::Version {
            msize: 8192,
            version: "9P2000".to_string(),
        })
        .await;
        let version = client.recv().await;
        assert_eq!(
            version.body,
            ResponseBody::Version {
                msize: 8192,
                version: "9P2000".to_string()
            }
        );
        let attach = client
            .call(RequestBody::Attach {
                fid: 1,
                afid: NOFID,
                uname: "glenda".to_string(),
                aname: String::new(),
            })
            .await;
        assert!(matches!(attach, ResponseBody::Attach { qid } if qid.ty == QTDIR));
        (client, fs, rx)
    }

    fn data(body: ResponseBody) -> Vec<u8> {
        match body {
            ResponseBody::Read { data } => data,
            other => panic!("expected Rread, got {other:?}"),
        }
    }

    fn error(body: ResponseBody) -> String {
        match body {
            ResponseBody::Error { ename } => ename,
            other => panic!("expected Rerror, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lists_and_stats_directories() {
        let (mut client, _fs, _rx) = connect().await;
        client.walk(2, &[]).await;
        assert!(matches!(client.open(2, OREAD).await, ResponseBody::Open { .. }));
        let listing = decode_stats(&data(client.read(2, 0, 8192).await)).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "ann");
        assert_eq!(listing[0].mode, DMDIR | 0o700);
        assert_eq!(listing[0].uid, "glenda");
        assert_eq!(listing[0].mtime, 100);

        client.walk(3, &["ann"]).await;
        client.open(3, OREAD).await;
        let names: Vec<_> = decode_stats(&data(client.read(3, 0, 8192).await))
            .unwrap()
            .into_iter()
            .map(|s| (s.name, s.mode))
            .collect();
        assert_eq!(
            names,
            [
                ("100.txt".to_string(), 0o600),
                ("in".to_string(), 0o600),
                ("out".to_string(), 0o400)
            ]
        );
    }

    #[tokio::test]
    async fn directory_reads_resume_where_they_stopped() {
        let (mut client, _fs, _rx) = connect().await;
        client.walk(2, &["ann"]).await;
        client.open(2, OREAD).await;

        let first = data(client.read(2, 0, 100).await);
        let first_entries = decode_stats(&first).unwrap();
        assert_eq!(first_entries.len(), 1);

        let rest = data(client.read(2, first.len() as u64, 8192).await);
        assert_eq!(decode_stats(&rest).unwrap().len(), 2);
        let end = first.len() + rest.len();
        assert!(data(client.read(2, end as u64, 8192).await).is_empty());

        let bad = error(client.read(2, 3, 8192).await);
        assert_eq!(bad, "bad offset in directory read");
    }

    #[tokio::test]
    async fn reading_a_message_marks_it_read_on_clunk() {
        let (mut client, _fs, mut rx) = connect().await;
        client.walk(2, &["ann", "100.txt"]).await;
        client.open(2, OREAD).await;
        assert_eq!(data(client.read(2, 0, 8192).await), b"> hello\n");
        assert!(rx.try_recv().is_err());

        assert_eq!(client.call(RequestBody::Clunk { fid: 2 }).await, ResponseBody::Clunk);
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendCommand::mark_read(ChatId(42), MessageId(7))
        );
    }

    #[tokio::test]
    async fn editing_a_message_sends_a_reply() {
        let (mut client, _fs, mut rx) = connect().await;
        client.walk(2, &["ann", "100.txt"]).await;
        client.open(2, ORDWR | OTRUNC).await;
        let written = client
            .call(RequestBody::Write {
                fid: 2,
                offset: 0,
                data: b"> hello\nsee you\n".to_vec(),
            })
            .await;
        assert_eq!(written, ResponseBody::Write { count: 16 });
        client.call(RequestBody::Clunk { fid: 2 }).await;

        match rx.try_recv().unwrap() {
            BackendCommand::SendMessage {
                chat_id,
                reply_to_message_id,
                ..
            } => {
                assert_eq!(chat_id, ChatId(42));
                assert_eq!(reply_to_message_id, Some(MessageId(7)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn writing_in_sends_on_clunk() {
        let (mut client, _fs, mut rx) = connect().await;
        client.walk(2, &["ann", "in"]).await;
        client.open(2, OWRITE | OTRUNC).await;
        client
            .call(RequestBody::Write {
                fid: 2,
                offset: 0,
                data: b"hi ann\n".to_vec(),
            })
            .await;
        assert!(rx.try_recv().is_err());
        client.call(RequestBody::Clunk { fid: 2 }).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendCommand::send_text(ChatId(42), "hi ann\n".to_string(), None)
        );
    }

    #[tokio::test]
    async fn out_read_waits_for_new_messages() {
        let (mut client, fs, _rx) = connect().await;
        client.walk(2, &["ann", "out"]).await;
        client.open(2, OREAD).await;
        let backlog = data(client.read(2, 0, 8192).await);
        assert_eq!(backlog, "ann § hello\n".as_bytes());

        client
            .send(
                50,
                RequestBody::Read {
                    fid: 2,
                    offset: backlog.len() as u64,
                    count: 8192,
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        add_message(&fs, &record(8, 200, "again"));

        let response = client.recv().await;
        assert_eq!(response.tag, 50);
        assert_eq!(data(response.body), "ann § again\n".as_bytes());
    }

    #[tokio::test]
    async fn flush_cancels_a_blocked_read() {
        let (mut client, _fs, _rx) = connect().await;
        client.walk(2, &["ann", "out"]).await;
        client.open(2, OREAD).await;
        client
            .send(
                50,
                RequestBody::Read {
                    fid: 2,
                    offset: 4096,
                    count: 8192,
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.send(51, RequestBody::Flush { oldtag: 50 }).await;
        let flushed = client.recv().await;
        assert_eq!((flushed.tag, flushed.body), (51, ResponseBody::Flush));

        // The flushed read never answers; the next reply is for the stat.
        let stat = client.call(RequestBody::Stat { fid: 2 }).await;
        assert!(matches!(stat, ResponseBody::Stat { stat } if stat.name == "out"));
    }

    #[tokio::test]
    async fn write_past_the_size_limit_is_an_error() {
        let (mut client, fs, mut rx) = connect().await;
        client.walk(2, &["ann", "100.txt"]).await;
        client.open(2, ORDWR).await;
        for offset in [u64::MAX, 1 << 40] {
            let reply = client
                .call(RequestBody::Write {
                    fid: 2,
                    offset,
                    data: b"x".to_vec(),
                })
                .await;
            assert!(error(reply).starts_with("File too large"));
        }

        // The session is still usable and the file untouched.
        let contents = data(client.read(2, 0, 100).await);
        assert_eq!(contents, b"> hello\n");
        client.call(RequestBody::Clunk { fid: 2 }).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendCommand::mark_read(ChatId(42), MessageId(7))
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(fs.tree().lookup("ann/100.txt").unwrap().stat().length, 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_reply_follows_rflush() {
        let (mut client, _fs, _rx) = connect().await;
        client.walk(2, &["ann", "100.txt"]).await;
        for _ in 0..200 {
            client.send(60_000, RequestBody::Stat { fid: 2 }).await;
            client.send(60_001, RequestBody::Flush { oldtag: 60_000 }).await;
            let first = client.recv().await;
            if first.tag == 60_000 {
                assert!(matches!(first.body, ResponseBody::Stat { .. }));
                let flushed = client.recv().await;
                assert_eq!((flushed.tag, flushed.body), (60_001, ResponseBody::Flush));
            } else {
                assert_eq!((first.tag, first.body), (60_001, ResponseBody::Flush));
            }
            // A late Rstat for the flushed tag would arrive before this reply.
            let stat = client.call(RequestBody::Stat { fid: 2 }).await;
            assert!(matches!(stat, ResponseBody::Stat { .. }));
        }
    }

    #[tokio::test]
    async fn truncating_wstat_empties_a_message() {
        let (mut client, fs, _rx) = connect().await;
        client.walk(2, &["ann", "100.txt"]).await;
        let reply = client
            .call(RequestBody::Wstat {
                fid: 2,
                stat: WireStat {
                    length: 0,
                    ..WireStat::unchanged()
                },
            })
            .await;
        assert_eq!(reply, ResponseBody::Wstat);
        assert_eq!(fs.tree().lookup("ann/100.txt").unwrap().stat().length, 0);

        let rename = client
            .call(RequestBody::Wstat {
                fid: 2,
                stat: WireStat {
                    name: "other.txt".to_string(),
                    ..WireStat::unchanged()
                },
            })
            .await;
        assert_eq!(error(rename), "rename not supported");
    }

    #[tokio::test]
    async fn remove_follows_node_rules() {
        let (mut client, fs, _rx) = connect().await;
        client.walk(2, &["ann"]).await;
        let refused = error(client.call(RequestBody::Remove { fid: 2 }).await);
        assert_eq!(refused, "Directory not empty");
        // Remove clunks the fid even on failure.
        let gone = error(client.call(RequestBody::Stat { fid: 2 }).await);
        assert_eq!(gone, "unknown fid");

        client.walk(3, &["ann", "100.txt"]).await;
        assert_eq!(client.call(RequestBody::Remove { fid: 3 }).await, ResponseBody::Remove);
        client.walk(4, &["ann"]).await;
        assert_eq!(client.call(RequestBody::Remove { fid: 4 }).await, ResponseBody::Remove);
        assert!(fs.tree().chat("ann").is_none());
    }

    #[tokio::test]
    async fn rejects_invalid_requests() {
        let (mut client, _fs, _rx) = connect().await;
        assert_eq!(error(client.walk(2, &["nobody"]).await), "file not found");

        let partial = client.walk(2, &["ann", "missing"]).await;
        assert!(matches!(partial, ResponseBody::Walk { ref qids } if qids.len() == 1));
        assert_eq!(error(client.open(2, OREAD).await), "unknown fid");

        client.walk(3, &["ann", "out"]).await;
        assert_eq!(error(client.open(3, OWRITE).await), "permission denied");

        client.walk(4, &["ann", "in"]).await;
        assert_eq!(error(client.read(4, 0, 10).await), "fid not open for reading");

        let create = client
            .call(RequestBody::Create {
                fid: 1,
                name: "new".to_string(),
                perm: 0o600,
                mode: OWRITE,
            })
            .await;
        assert_eq!(error(create), "create prohibited");

        let auth = client
            .call(RequestBody::Auth {
                afid: 9,
                uname: "glenda".to_string(),
                aname: String::new(),
            })
            .await;
        assert_eq!(error(auth), "authentication not required");

        assert_eq!(
            error(client.call(RequestBody::Remove { fid: 1 }).await),
            "Operation not supported: remove"
        );
    }

    #[tokio::test]
    async fn requests_before_version_are_refused() {
        let (commands, _rx) = mpsc::unbounded_channel();
        let fs = Arc::new(ChatFs::new(Database::open_in_memory().unwrap(), commands));
        let (client_end, server_end) = tokio::io::duplex(4096);
        tokio::spawn(Session::new(fs, "glenda".to_string()).run(server_end));
        let mut client = Client {
            stream: client_end,
            next_tag: 0,
        };
        let attach = client
            .call(RequestBody::Attach {
                fid: 1,
                afid: NOFID,
                uname: "glenda".to_string(),
                aname: String::new(),
            })
            .await;
        assert_eq!(error(attach), "protocol version not negotiated");
    }

    #[tokio::test]
    async fn disconnect_clunks_open_fids() {
        let (mut client, _fs, mut rx) = connect().await;
        client.walk(2, &["ann", "in"]).await;
        client.open(2, OWRITE).await;
        client
            .call(RequestBody::Write {
                fid: 2,
                offset: 0,
                data: b"bye".to_vec(),
            })
            .await;
        drop(client);

        let command = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(
            command,
            BackendCommand::send_text(ChatId(42), "bye".to_string(), None)
        );
    }
}
