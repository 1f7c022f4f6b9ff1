//! Per-edge stream transport
//!
//! One ring per producer output port, shared by every consumer connected to
//! it. The writer commits items behind a single write position; each reader
//! owns an independent cursor, and writes are gated by the slowest live
//! cursor, so a full ring back-pressures the producer without copying the
//! stream per destination.
//!
//! Endpoints exchange data through staging buffers owned by the handle:
//! `reserve`/`commit` on the writer side, `peek`/`advance` on the reader
//! side. `close()` is idempotent; readers drain whatever was committed
//! before observing [`StreamClosed`]. Dropping the writer closes the
//! stream, dropping a reader retires its cursor.
//!
//! Fixed-record streams instantiate the ring with the element type;
//! structured-object streams instantiate it with [`Frame`](super::types::Frame).
//! Both variants share this file's back-pressure and shutdown contract.

use std::any::Any;
use std::sync::{Arc, Condvar, Mutex};

use super::errors::StreamClosed;
use super::monitor::{StallHandle, StallMonitor, WaitGuard};

/// Assumed allocation granularity for default capacities.
pub const PAGE_SIZE: usize = 4096;

/// Typical number of items a block moves per `process` call.
pub const DEFAULT_CHUNK: usize = 512;

/// Default object-queue capacity, in objects.
pub const DEFAULT_OBJECT_CAPACITY: usize = 256;

/// Default fixed-ring capacity in items: a page-size multiple covering at
/// least two typical process chunks.
pub fn default_capacity(item_size: usize) -> usize {
    let bytes = 2 * PAGE_SIZE;
    (bytes / item_size.max(1)).max(2 * DEFAULT_CHUNK)
}

/// Parameters for allocating one stream.
pub struct StreamSpec {
    /// Diagnostic label, e.g. `source.out0`
    pub label: String,
    /// Ring capacity in items
    pub capacity: usize,
    /// Number of reader cursors (fan-out count; 0 for an unconnected tap)
    pub n_readers: usize,
    /// Stall monitor to report blocked waits to
    pub monitor: Option<StallMonitor>,
}

/// A freshly allocated stream with type-erased endpoints, as handed to the
/// scheduler by the type registry's factories.
pub struct AllocatedStream {
    pub writer: Box<dyn Any + Send>,
    pub readers: Vec<Box<dyn Any + Send>>,
    pub control: Arc<dyn StreamControl>,
}

/// Shutdown-side handle to a stream, independent of its element type.
pub trait StreamControl: Send + Sync {
    /// Refuse further writes and wake all blocked endpoints. Readers may
    /// still drain committed items. Idempotent.
    fn close(&self);
    fn label(&self) -> &str;
}

struct RingState<T> {
    buf: Vec<T>,
    write_pos: u64,
    /// One cursor per reader; `None` once that reader has been dropped
    cursors: Vec<Option<u64>>,
    closed: bool,
}

impl<T> RingState<T> {
    fn min_cursor(&self) -> Option<u64> {
        self.cursors.iter().flatten().copied().min()
    }
}

struct Shared<T> {
    state: Mutex<RingState<T>>,
    /// Signalled when a reader advances or retires
    space: Condvar,
    /// Signalled when the writer commits or the stream closes
    data: Condvar,
    label: String,
    capacity: usize,
}

impl<T: Send> StreamControl for Shared<T> {
    fn close(&self) {
        let mut st = self.state.lock().unwrap();
        if !st.closed {
            st.closed = true;
            drop(st);
            self.space.notify_all();
            self.data.notify_all();
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Allocate a ring with one writer and `n_readers` cursors.
pub fn allocate<T>(spec: &StreamSpec) -> (StreamWriter<T>, Vec<StreamReader<T>>, Arc<dyn StreamControl>)
where
    T: Clone + Default + Send + 'static,
{
    let shared = Arc::new(Shared {
        state: Mutex::new(RingState {
            buf: vec![T::default(); spec.capacity],
            write_pos: 0,
            cursors: vec![Some(0); spec.n_readers],
            closed: false,
        }),
        space: Condvar::new(),
        data: Condvar::new(),
        label: spec.label.clone(),
        capacity: spec.capacity,
    });

    let writer = StreamWriter {
        shared: Arc::clone(&shared),
        staging: Vec::new(),
        reserved: 0,
        committed: 0,
        connected: spec.n_readers > 0,
        stall: spec
            .monitor
            .as_ref()
            .map(|m| m.register(&spec.label, "write")),
    };

    let readers = (0..spec.n_readers)
        .map(|index| StreamReader {
            shared: Arc::clone(&shared),
            index,
            staging: Vec::new(),
            peeked: 0,
            advanced_total: 0,
            stall: spec
                .monitor
                .as_ref()
                .map(|m| m.register(&spec.label, "read")),
        })
        .collect();

    let control: Arc<dyn StreamControl> = shared;
    (writer, readers, control)
}

/// Allocate and immediately type-erase, for the registry's stream factories.
pub(crate) fn allocate_erased<T>(spec: &StreamSpec) -> AllocatedStream
where
    T: Clone + Default + Send + 'static,
{
    let (writer, readers, control) = allocate::<T>(spec);
    AllocatedStream {
        writer: Box::new(writer),
        readers: readers
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn Any + Send>)
            .collect(),
        control,
    }
}

/// Producer endpoint of one stream.
pub struct StreamWriter<T> {
    shared: Arc<Shared<T>>,
    staging: Vec<T>,
    reserved: usize,
    committed: u64,
    connected: bool,
    stall: Option<StallHandle>,
}

impl<T: Clone + Default + Send> StreamWriter<T> {
    /// Borrow a staging area of `n` items to fill before [`commit`](Self::commit).
    pub fn reserve(&mut self, n: usize) -> &mut [T] {
        if self.staging.len() < n {
            self.staging.resize(n, T::default());
        }
        self.reserved = n;
        &mut self.staging[..n]
    }

    /// Publish the first `n` reserved items, blocking until the slowest
    /// reader has freed enough space.
    ///
    /// # Panics
    /// If `n` exceeds the reserved count or the ring capacity.
    pub fn commit(&mut self, n: usize) -> Result<(), StreamClosed> {
        assert!(
            n <= self.reserved,
            "commit of {n} items exceeds reserved {}",
            self.reserved
        );
        self.reserved = 0;
        if n == 0 {
            return Ok(());
        }
        if !self.connected {
            // Unconnected tap: account for the items and drop them
            self.committed += n as u64;
            return Ok(());
        }
        assert!(
            n <= self.shared.capacity,
            "commit of {n} items exceeds stream capacity {}",
            self.shared.capacity
        );

        let _guard = self.stall.as_ref().map(WaitGuard::new);
        let mut st = self.shared.state.lock().unwrap();
        loop {
            if st.closed {
                return Err(StreamClosed);
            }
            let Some(min) = st.min_cursor() else {
                // Every reader has been dropped
                return Err(StreamClosed);
            };
            let used = (st.write_pos - min) as usize;
            if self.shared.capacity - used >= n {
                break;
            }
            st = self.shared.space.wait(st).unwrap();
        }

        let cap = self.shared.capacity as u64;
        for i in 0..n {
            let slot = ((st.write_pos + i as u64) % cap) as usize;
            st.buf[slot] = self.staging[i].clone();
        }
        st.write_pos += n as u64;
        self.committed += n as u64;
        drop(st);
        self.shared.data.notify_all();
        Ok(())
    }

    /// Copy a whole slice into the stream, chunked to fit the ring.
    pub fn write(&mut self, items: &[T]) -> Result<(), StreamClosed> {
        let step = self.shared.capacity.min(DEFAULT_CHUNK).max(1);
        for chunk in items.chunks(step) {
            let dst = self.reserve(chunk.len());
            dst.clone_from_slice(chunk);
            self.commit(chunk.len())?;
        }
        Ok(())
    }

    /// Total items committed by this writer.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Close the stream. Readers drain committed items first.
    pub fn close(&self) {
        StreamControl::close(&*self.shared);
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl<T> Drop for StreamWriter<T> {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock().unwrap();
        if !st.closed {
            st.closed = true;
            drop(st);
            self.shared.space.notify_all();
            self.shared.data.notify_all();
        }
    }
}

/// Consumer endpoint of one stream, owning one cursor.
pub struct StreamReader<T> {
    shared: Arc<Shared<T>>,
    index: usize,
    staging: Vec<T>,
    peeked: usize,
    advanced_total: u64,
    stall: Option<StallHandle>,
}

impl<T: Clone> StreamReader<T> {
    /// Readable items, blocking until at least one is committed.
    /// After close, returns the remaining items until drained, then
    /// [`StreamClosed`].
    pub fn peek(&mut self) -> Result<&[T], StreamClosed> {
        self.peek_at_least(1)
    }

    /// Readable items, blocking until at least `min` are committed or the
    /// stream closes (a closing stream may yield fewer than `min`).
    pub fn peek_at_least(&mut self, min: usize) -> Result<&[T], StreamClosed> {
        let min = min.max(1) as u64;
        let _guard = self.stall.as_ref().map(WaitGuard::new);
        let mut st = self.shared.state.lock().unwrap();
        let (cur, avail) = loop {
            let cur = st.cursors[self.index].expect("cursor retired while reader alive");
            let avail = st.write_pos - cur;
            if avail >= min {
                break (cur, avail);
            }
            if st.closed {
                if avail > 0 {
                    break (cur, avail);
                }
                return Err(StreamClosed);
            }
            st = self.shared.data.wait(st).unwrap();
        };

        let cap = self.shared.capacity as u64;
        self.staging.clear();
        self.staging.reserve(avail as usize);
        for i in 0..avail {
            self.staging.push(st.buf[((cur + i) % cap) as usize].clone());
        }
        self.peeked = avail as usize;
        Ok(&self.staging[..])
    }

    /// Consume `n` of the items returned by the last peek.
    ///
    /// # Panics
    /// If `n` exceeds the peeked count.
    pub fn advance(&mut self, n: usize) {
        assert!(
            n <= self.peeked,
            "advance of {n} items exceeds peeked {}",
            self.peeked
        );
        if n == 0 {
            return;
        }
        let mut st = self.shared.state.lock().unwrap();
        if let Some(cur) = st.cursors[self.index].as_mut() {
            *cur += n as u64;
        }
        drop(st);
        self.peeked -= n;
        self.advanced_total += n as u64;
        self.shared.space.notify_all();
    }

    /// Total items this reader has consumed.
    pub fn advanced(&self) -> u64 {
        self.advanced_total
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl<T> Drop for StreamReader<T> {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock().unwrap();
        st.cursors[self.index] = None;
        drop(st);
        // The writer may have been gated on this cursor
        self.shared.space.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn spec(capacity: usize, n_readers: usize) -> StreamSpec {
        StreamSpec {
            label: "test.out0".to_string(),
            capacity,
            n_readers,
            monitor: None,
        }
    }

    #[test]
    fn test_fifo_order_and_counters() {
        let (mut w, mut readers, _ctl) = allocate::<u32>(&spec(16, 1));
        let mut r = readers.pop().unwrap();

        let dst = w.reserve(4);
        dst.copy_from_slice(&[1, 2, 3, 4]);
        w.commit(4).unwrap();

        let got = r.peek().unwrap().to_vec();
        assert_eq!(got, vec![1, 2, 3, 4]);
        r.advance(4);

        assert_eq!(w.committed(), 4);
        assert_eq!(r.advanced(), 4);
        assert!(w.committed() >= r.advanced());
    }

    #[test]
    fn test_partial_advance_keeps_remainder() {
        let (mut w, mut readers, _ctl) = allocate::<u32>(&spec(8, 1));
        let mut r = readers.pop().unwrap();

        w.reserve(3).copy_from_slice(&[7, 8, 9]);
        w.commit(3).unwrap();

        assert_eq!(r.peek().unwrap(), &[7, 8, 9]);
        r.advance(1);
        assert_eq!(r.peek().unwrap(), &[8, 9]);
        r.advance(2);
        assert_eq!(r.advanced(), 3);
    }

    #[test]
    fn test_writer_blocks_until_slowest_reader_advances() {
        let (mut w, readers, _ctl) = allocate::<u32>(&spec(4, 2));
        let mut readers = readers.into_iter();
        let mut fast = readers.next().unwrap();
        let mut slow = readers.next().unwrap();

        w.reserve(4).copy_from_slice(&[0, 1, 2, 3]);
        w.commit(4).unwrap();

        // Fast reader consumes everything; slow reader holds the ring full
        assert_eq!(fast.peek().unwrap().len(), 4);
        fast.advance(4);

        let writer_thread = thread::spawn(move || {
            w.reserve(2).copy_from_slice(&[4, 5]);
            w.commit(2).unwrap();
            w
        });

        // Give the writer a chance to block on the slow cursor
        thread::sleep(Duration::from_millis(50));
        assert!(!writer_thread.is_finished());

        assert_eq!(slow.peek().unwrap(), &[0, 1, 2, 3]);
        slow.advance(4);

        let w = writer_thread.join().unwrap();
        assert_eq!(w.committed(), 6);

        assert_eq!(slow.peek().unwrap(), &[4, 5]);
        assert_eq!(fast.peek().unwrap(), &[4, 5]);
    }

    #[test]
    fn test_fan_out_cursors_are_independent() {
        let (mut w, readers, _ctl) = allocate::<u32>(&spec(16, 3));
        let mut readers: Vec<_> = readers.into_iter().collect();

        w.reserve(5).copy_from_slice(&[10, 11, 12, 13, 14]);
        w.commit(5).unwrap();

        for r in readers.iter_mut() {
            assert_eq!(r.peek().unwrap(), &[10, 11, 12, 13, 14]);
        }
        readers[0].advance(5);
        readers[1].advance(2);
        assert_eq!(readers[1].peek().unwrap(), &[12, 13, 14]);
        assert_eq!(readers[2].peek().unwrap(), &[10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_close_lets_readers_drain() {
        let (mut w, mut readers, _ctl) = allocate::<u32>(&spec(8, 1));
        let mut r = readers.pop().unwrap();

        w.reserve(2).copy_from_slice(&[1, 2]);
        w.commit(2).unwrap();
        drop(w);

        assert_eq!(r.peek().unwrap(), &[1, 2]);
        r.advance(2);
        assert_eq!(r.peek(), Err(StreamClosed));
        assert_eq!(r.peek(), Err(StreamClosed));
    }

    #[test]
    fn test_peek_at_least_returns_short_on_close() {
        let (mut w, mut readers, _ctl) = allocate::<u32>(&spec(8, 1));
        let mut r = readers.pop().unwrap();

        w.reserve(2).copy_from_slice(&[1, 2]);
        w.commit(2).unwrap();
        w.close();

        // Fewer than requested, but not empty
        assert_eq!(r.peek_at_least(4).unwrap(), &[1, 2]);
    }

    #[test]
    fn test_dropping_all_readers_fails_the_writer() {
        let (mut w, readers, _ctl) = allocate::<u32>(&spec(4, 1));
        drop(readers);

        w.reserve(1)[0] = 9;
        assert_eq!(w.commit(1), Err(StreamClosed));
    }

    #[test]
    fn test_unconnected_tap_discards() {
        let (mut w, readers, _ctl) = allocate::<u32>(&spec(4, 0));
        assert!(readers.is_empty());

        // Far more than the capacity; must never block or fail
        for _ in 0..10 {
            w.reserve(4).copy_from_slice(&[0, 1, 2, 3]);
            w.commit(4).unwrap();
        }
        assert_eq!(w.committed(), 40);
    }

    #[test]
    fn test_control_close_is_idempotent() {
        let (mut w, mut readers, ctl) = allocate::<u32>(&spec(4, 1));
        let mut r = readers.pop().unwrap();

        w.reserve(1)[0] = 5;
        w.commit(1).unwrap();

        ctl.close();
        ctl.close();

        assert_eq!(r.peek().unwrap(), &[5]);
        r.advance(1);
        assert_eq!(r.peek(), Err(StreamClosed));
        assert_eq!(w.commit(0), Ok(()));
        w.reserve(1)[0] = 6;
        assert_eq!(w.commit(1), Err(StreamClosed));
    }

    #[test]
    #[should_panic(expected = "exceeds reserved")]
    fn test_commit_beyond_reserve_panics() {
        let (mut w, _readers, _ctl) = allocate::<u32>(&spec(4, 1));
        w.reserve(1);
        let _ = w.commit(2);
    }

    #[test]
    #[should_panic(expected = "exceeds peeked")]
    fn test_advance_beyond_peek_panics() {
        let (mut w, mut readers, _ctl) = allocate::<u32>(&spec(4, 1));
        let mut r = readers.pop().unwrap();
        w.reserve(1)[0] = 1;
        w.commit(1).unwrap();
        let _ = r.peek().unwrap();
        r.advance(2);
    }

    #[test]
    fn test_write_chunks_large_slices() {
        let (mut w, mut readers, _ctl) = allocate::<u32>(&spec(1024, 1));
        let mut r = readers.pop().unwrap();
        let data: Vec<u32> = (0..900).collect();

        let reader_thread = thread::spawn(move || {
            let mut got = Vec::new();
            while let Ok(items) = r.peek() {
                let n = items.len();
                got.extend_from_slice(items);
                r.advance(n);
            }
            got
        });

        w.write(&data).unwrap();
        drop(w);

        let got = reader_thread.join().unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn test_default_capacity_covers_two_chunks() {
        assert!(default_capacity(4) * 4 >= 2 * PAGE_SIZE);
        assert!(default_capacity(4096) >= 2 * DEFAULT_CHUNK);
    }
}
