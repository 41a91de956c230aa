// Streaming pipeline
//
// One producer thread reads fixed-size chunks. One Stage 1 worker runs
// serially over them (the quoted-state carry forces ordering), measures
// header/trailer, maintains the split-row buffer and assigns sequences. A
// small pool of Stage 2 workers parses chunk payloads independently and
// emits `RecordsOutput` values tagged with the chunk sequence; the consumer
// restores order with a reorder map.
//
// Every channel is bounded, so a slow consumer stalls the whole pipeline
// back to the producer. Shutdown is cooperative: dropping the output
// receiver makes sends fail, which unwinds each stage in turn.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::core::masks::build_chunk_masks;
use crate::core::postproc;
use crate::core::stage1::{
    clip_masks, leading_partial, refine_chunk_masks, trailing_partial, PostProcMark,
};
use crate::core::stage2::{parse_masks, Slabs};
use crate::error::{Error, Result};
use crate::fallback::parse_reference;

/// Settings the pipeline needs; assembled by `ReaderBuilder`.
#[derive(Debug, Clone)]
pub(crate) struct PipelineOptions {
    pub delimiter: u8,
    pub comment: Option<u8>,
    pub trim_leading_space: bool,
    pub fields_per_record: i64,
    pub chunk_size: usize,
    pub workers: usize,
    pub capacity: usize,
}

/// One block of parsed records, tagged with its chunk sequence.
/// A sequence of -1 signals a terminal error for the stream.
#[derive(Debug)]
pub struct RecordsOutput {
    pub sequence: i64,
    pub records: Vec<Vec<String>>,
    pub err: Option<Error>,
}

/// A raw chunk from the producer.
struct ChunkIn {
    buf: Vec<u8>,
    last: bool,
    err: Option<io::Error>,
}

/// A preprocessed chunk, owned by exactly one Stage 2 worker.
struct ChunkInfo {
    sequence: i64,
    chunk: Vec<u8>,
    masks: Vec<u64>,
    marks: Vec<PostProcMark>,
    header: usize,
    trailer: usize,
    split_row: Vec<u8>,
    err: Option<Error>,
}

impl ChunkInfo {
    fn empty(sequence: i64, split_row: Vec<u8>) -> Self {
        ChunkInfo {
            sequence,
            chunk: Vec::new(),
            masks: Vec::new(),
            marks: Vec::new(),
            header: 0,
            trailer: 0,
            split_row,
            err: None,
        }
    }

    fn failed(err: Error) -> Self {
        let mut info = ChunkInfo::empty(-1, Vec::new());
        info.err = Some(err);
        info
    }
}

fn error_output(err: Error) -> RecordsOutput {
    RecordsOutput {
        sequence: -1,
        records: Vec::new(),
        err: Some(err),
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

enum ReadStatus {
    More,
    Eof,
    Failed(io::Error),
}

/// Fill one chunk from the input, retrying short reads.
fn read_chunk<R: Read>(input: &mut R, size: usize) -> (Vec<u8>, ReadStatus) {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    loop {
        if filled == size {
            return (buf, ReadStatus::More);
        }
        match input.read(&mut buf[filled..]) {
            Ok(0) => {
                buf.truncate(filled);
                return (buf, ReadStatus::Eof);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                buf.truncate(filled);
                return (buf, ReadStatus::Failed(e));
            }
        }
    }
}

/// Read chunks sequentially, flagging the final one. Keeps one chunk of
/// lookahead so EOF can be attributed to the last chunk rather than an
/// extra empty one.
fn produce<R: Read>(input: &mut R, tx: &Sender<ChunkIn>, chunk_size: usize) {
    let (first, first_status) = read_chunk(input, chunk_size);
    let mut chunk = first;
    let mut status = first_status;
    loop {
        match status {
            ReadStatus::Eof => {
                if !chunk.is_empty() {
                    let _ = tx.send(ChunkIn { buf: chunk, last: true, err: None });
                }
                return;
            }
            ReadStatus::Failed(e) => {
                log::warn!("input read failed: {e}");
                if !chunk.is_empty() {
                    let sent = tx.send(ChunkIn {
                        buf: std::mem::take(&mut chunk),
                        last: true,
                        err: None,
                    });
                    if sent.is_err() {
                        return;
                    }
                }
                let _ = tx.send(ChunkIn { buf: Vec::new(), last: true, err: Some(e) });
                return;
            }
            ReadStatus::More => {
                let (next, next_status) = read_chunk(input, chunk_size);
                if next.is_empty() {
                    status = next_status;
                    continue;
                }
                if tx.send(ChunkIn { buf: chunk, last: false, err: None }).is_err() {
                    return;
                }
                chunk = next;
                status = next_status;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 1 worker (singleton: the quoted carry imposes chunk order)
// ---------------------------------------------------------------------------

fn stage1_worker(rx: Receiver<ChunkIn>, tx: Sender<ChunkInfo>, delimiter: u8) {
    let mut sequence: i64 = 0;
    let mut quoted = false;
    let mut split_row: Vec<u8> = Vec::with_capacity(256);

    for input in rx {
        if let Some(err) = input.err {
            let _ = tx.send(ChunkInfo::failed(Error::Read(err)));
            return;
        }

        let chunk = input.buf;
        let mut masks = Vec::new();
        let mut marks = Vec::new();
        build_chunk_masks(&chunk, delimiter, &mut masks);
        refine_chunk_masks(&mut masks, &mut quoted, &mut marks);

        let header = if sequence == 0 {
            0
        } else {
            leading_partial(&chunk, &masks)
        };

        if header < chunk.len() {
            let trailer = if input.last {
                0
            } else {
                trailing_partial(&chunk, &masks)
            };
            let mut split = std::mem::take(&mut split_row);
            split.extend_from_slice(&chunk[..header]);
            split_row.extend_from_slice(&chunk[chunk.len() - trailer..]);
            let sent = tx.send(ChunkInfo {
                sequence,
                chunk,
                masks,
                marks,
                header,
                trailer,
                split_row: split,
                err: None,
            });
            if sent.is_err() {
                return;
            }
        } else {
            // No row boundary anywhere in this chunk: absorb it into the
            // split-row buffer and emit an empty payload so sequences stay
            // contiguous. The row completes in a later chunk (or at EOF).
            split_row.extend_from_slice(&chunk);
            if tx.send(ChunkInfo::empty(sequence, Vec::new())).is_err() {
                return;
            }
        }
        sequence += 1;

        if input.last && !split_row.is_empty() {
            let split = std::mem::take(&mut split_row);
            let _ = tx.send(ChunkInfo::empty(sequence, split));
            sequence += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 2 workers
// ---------------------------------------------------------------------------

fn stage2_worker(
    rx: Receiver<ChunkInfo>,
    tx: Sender<RecordsOutput>,
    opts: PipelineOptions,
    fields_per_record: Arc<AtomicI64>,
) {
    let mut slabs = Slabs::default();

    for mut info in rx {
        if let Some(err) = info.err {
            let _ = tx.send(error_output(err));
            return;
        }

        let mut records: Vec<Vec<String>> = Vec::new();

        // Rows that straddle the previous chunk boundary go through the
        // reference parser first so they appear exactly once, in order.
        if !info.split_row.is_empty() {
            match parse_reference(&info.split_row, opts.delimiter, opts.comment) {
                Ok(rows) => records.extend(rows),
                Err(err) => {
                    let _ = tx.send(error_output(err));
                    return;
                }
            }
        }
        let skip_rows = records.len();

        if !info.chunk.is_empty() {
            let end = info.chunk.len() - info.trailer;
            clip_masks(&mut info.masks, info.header, end);

            if parse_masks(&info.chunk, &info.masks, info.header, end, &mut slabs) {
                // Structural inconsistency: discard the partial slabs and let
                // the reference parser decide. Its output replaces the
                // chunk's records; its error, if any, is surfaced verbatim.
                log::debug!("chunk {}: surrendered to the reference parser", info.sequence);
                match parse_reference(&info.chunk[info.header..end], opts.delimiter, opts.comment) {
                    Ok(rows) => {
                        records.truncate(skip_rows);
                        records.extend(rows);
                    }
                    Err(err) => {
                        let _ = tx.send(error_output(err));
                        return;
                    }
                }
            } else {
                for row in &slabs.rows {
                    records.push(
                        slabs
                            .row_columns(row)
                            .iter()
                            .map(|c| {
                                String::from_utf8_lossy(
                                    &info.chunk[c.offset as usize..(c.offset + c.len) as usize],
                                )
                                .into_owned()
                            })
                            .collect(),
                    );
                }
                postproc::apply(&mut records, skip_rows, &slabs, &info.marks);
                if let Some(comment) = opts.comment {
                    filter_comments(&mut records, skip_rows, &slabs, &info.chunk, comment);
                }
            }
        }

        if let Err(err) = ensure_fields_per_record(&records, &fields_per_record) {
            let _ = tx.send(error_output(err));
            return;
        }
        if opts.trim_leading_space {
            trim_leading_space(&mut records);
        }

        let sent = tx.send(RecordsOutput {
            sequence: info.sequence,
            records,
            err: None,
        });
        if sent.is_err() {
            return;
        }
    }
}

/// Enforce the shared field count. The first worker to observe a record
/// pins the count when the setting is zero; subsequent records must match.
fn ensure_fields_per_record(records: &[Vec<String>], shared: &AtomicI64) -> Result<()> {
    if shared.load(Ordering::SeqCst) == 0 {
        if let Some(first) = records.first() {
            let _ = shared.compare_exchange(
                0,
                first.len() as i64,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }
    let want = shared.load(Ordering::SeqCst);
    if want > 0 {
        for (i, record) in records.iter().enumerate() {
            if record.len() as i64 != want {
                return Err(Error::FieldCount { line: i + 1 });
            }
        }
    }
    Ok(())
}

/// Drop engine-parsed rows whose raw first byte is the comment byte. The
/// column offsets exclude the bracketing quotes, so a quoted first field is
/// recognized by the quote just before its offset and survives even when
/// its content starts with the comment byte.
fn filter_comments(
    records: &mut Vec<Vec<String>>,
    base: usize,
    slabs: &Slabs,
    chunk: &[u8],
    comment: u8,
) {
    for (i, row) in slabs.rows.iter().enumerate().rev() {
        let is_comment = slabs.row_columns(row).first().map_or(false, |c| {
            let offset = c.offset as usize;
            let quoted = offset > 0 && chunk[offset - 1] == b'"';
            !quoted && c.len > 0 && chunk[offset] == comment
        });
        if is_comment {
            records.remove(base + i);
        }
    }
}

fn trim_leading_space(records: &mut [Vec<String>]) {
    for record in records.iter_mut() {
        for field in record.iter_mut() {
            let trimmed = field.trim_start();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring and reassembly
// ---------------------------------------------------------------------------

/// Run the full pipeline over `input` inside a thread scope and collect the
/// records in sequence order.
pub(crate) fn read_to_end<R: Read + Send>(
    input: &mut R,
    opts: &PipelineOptions,
) -> Result<Vec<Vec<String>>> {
    let opts = opts.clone();
    let fields = Arc::new(AtomicI64::new(opts.fields_per_record));

    thread::scope(|s| {
        let (tx_in, rx_in) = bounded::<ChunkIn>(opts.capacity);
        let (tx_chunks, rx_chunks) = bounded::<ChunkInfo>(opts.capacity);
        let (tx_out, rx_out) = bounded::<RecordsOutput>(opts.capacity);

        let chunk_size = opts.chunk_size;
        s.spawn(move || produce(input, &tx_in, chunk_size));

        let delimiter = opts.delimiter;
        s.spawn(move || stage1_worker(rx_in, tx_chunks, delimiter));

        for _ in 0..opts.workers.max(1) {
            let rx = rx_chunks.clone();
            let tx = tx_out.clone();
            let worker_opts = opts.clone();
            let worker_fields = fields.clone();
            s.spawn(move || stage2_worker(rx, tx, worker_opts, worker_fields));
        }
        drop(rx_chunks);
        drop(tx_out);

        reassemble(&rx_out)
    })
}

/// Spawn the pipeline on detached threads and hand back the output channel.
pub(crate) fn spawn_pipeline<R: Read + Send + 'static>(
    mut input: R,
    opts: PipelineOptions,
) -> Receiver<RecordsOutput> {
    let fields = Arc::new(AtomicI64::new(opts.fields_per_record));
    let (tx_in, rx_in) = bounded::<ChunkIn>(opts.capacity);
    let (tx_chunks, rx_chunks) = bounded::<ChunkInfo>(opts.capacity);
    let (tx_out, rx_out) = bounded::<RecordsOutput>(opts.capacity);

    let chunk_size = opts.chunk_size;
    thread::spawn(move || produce(&mut input, &tx_in, chunk_size));

    let delimiter = opts.delimiter;
    thread::spawn(move || stage1_worker(rx_in, tx_chunks, delimiter));

    for _ in 0..opts.workers.max(1) {
        let rx = rx_chunks.clone();
        let tx = tx_out.clone();
        let worker_opts = opts.clone();
        let worker_fields = fields.clone();
        thread::spawn(move || stage2_worker(rx, tx, worker_opts, worker_fields));
    }

    rx_out
}

/// Collect everything from the output channel in ascending sequence order.
/// On error the channel is drained so upstream stages can unwind.
fn reassemble(rx: &Receiver<RecordsOutput>) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut pending: HashMap<i64, Vec<Vec<String>>> = HashMap::new();
    let mut next = 0i64;

    for out in rx.iter() {
        if let Some(err) = out.err {
            for _ in rx.iter() {}
            return Err(err);
        }
        if out.sequence != next {
            pending.insert(out.sequence, out.records);
            continue;
        }
        records.extend(out.records);
        next += 1;
        while let Some(more) = pending.remove(&next) {
            records.extend(more);
            next += 1;
        }
    }
    Ok(records)
}

/// Ordered row iterator over a running pipeline. Dropping it drops the
/// output receiver, which shuts the pipeline down.
pub struct Records {
    rx: Receiver<RecordsOutput>,
    pending: HashMap<i64, Vec<Vec<String>>>,
    next_sequence: i64,
    current: std::vec::IntoIter<Vec<String>>,
    done: bool,
}

impl Records {
    pub(crate) fn new(rx: Receiver<RecordsOutput>) -> Self {
        Records {
            rx,
            pending: HashMap::new(),
            next_sequence: 0,
            current: Vec::new().into_iter(),
            done: false,
        }
    }
}

impl Iterator for Records {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.current.next() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            if let Some(block) = self.pending.remove(&self.next_sequence) {
                self.next_sequence += 1;
                self.current = block.into_iter();
                continue;
            }
            match self.rx.recv() {
                Ok(out) => {
                    if let Some(err) = out.err {
                        self.done = true;
                        return Some(Err(err));
                    }
                    if out.sequence != self.next_sequence {
                        self.pending.insert(out.sequence, out.records);
                        continue;
                    }
                    self.next_sequence += 1;
                    self.current = out.records.into_iter();
                }
                Err(_) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}
