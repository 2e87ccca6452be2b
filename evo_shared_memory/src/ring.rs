//! Single-producer / single-consumer ring protocol over a session segment.
//!
//! The writer commits row `W` into slot `W mod N` and then publishes `W + 1`
//! with `Release`. Before touching the row it also publishes a claim
//! (`write_claim = W + 1`), so a reader can tell which slots may have been
//! overwritten while it was copying:
//!
//! ```text
//! writer:  claim = W+1 ─ fence ─ write row ─ counter = W+1 (Release)
//! reader:  W = counter (Acquire) ─ copy rows ─ fence ─ K = claim
//!          rows with index < K − N are discarded as torn
//! ```
//!
//! The consumer cursor `C` is process local. Overload never blocks the
//! writer; lost rows are reported through [`Batch::missed`].

use crate::error::{ShmError, ShmResult};
use crate::layout::{RingLayout, StreamLayout};
use crate::segment::{SessionHeader, SharedMemorySegment};
use evo::schema::{Element, ElementType, ScalarType};
use std::ptr;
use std::sync::atomic::{Ordering, fence};

const TIME_SIZE: usize = std::mem::size_of::<f64>();

/// Rows copied out of the ring by one read.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Sample timestamps in write order
    pub times: Vec<f64>,
    /// One column per declared stream, in declaration order
    pub streams: Vec<StreamColumn>,
    /// Samples overwritten before they could be read
    pub missed: u64,
}

impl Batch {
    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// True when the batch holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Column of the stream called `name`.
    pub fn stream(&self, name: &str) -> Option<&StreamColumn> {
        self.streams.iter().find(|s| s.name == name)
    }

    fn drop_front(&mut self, rows: usize) {
        self.times.drain(..rows);
        for stream in &mut self.streams {
            let row_size = stream.row_size();
            stream.present.drain(..rows);
            stream.bytes.drain(..rows * row_size);
        }
    }
}

/// The rows of one stream, raw bytes plus presence flags.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamColumn {
    /// Stream name
    pub name: String,
    /// Per-sample shape
    pub shape: Vec<usize>,
    /// Element type
    pub element: ElementType,
    /// Whether the stream carried data in each row
    pub present: Vec<bool>,
    /// Row-major data, `len() * row_size()` bytes; absent rows hold fill values
    pub bytes: Vec<u8>,
}

impl StreamColumn {
    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.present.len()
    }

    /// True when the column holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    /// Bytes per row.
    #[inline]
    pub fn row_size(&self) -> usize {
        self.shape.iter().product::<usize>() * self.element.size()
    }

    /// Rows where the stream carried data.
    pub fn present_count(&self) -> usize {
        self.present.iter().filter(|p| **p).count()
    }

    /// Raw bytes of row `index`, whether present or not.
    pub fn row_bytes(&self, index: usize) -> Option<&[u8]> {
        let row_size = self.row_size();
        self.bytes.get(index * row_size..(index + 1) * row_size)
    }

    /// All rows as a flat vector of `T` (`len() * elements_per_row` values).
    ///
    /// Absent rows are included with their fill values; check
    /// [`present`](Self::present) to tell them apart.
    pub fn values<T: Element>(&self) -> ShmResult<Vec<T>> {
        self.check_element::<T>()?;
        Ok(bytemuck::pod_collect_to_vec(&self.bytes))
    }

    /// Row `index` as a vector of `T`; `None` if the stream was absent in
    /// that row or `index` is out of range.
    pub fn row<T: Element>(&self, index: usize) -> ShmResult<Option<Vec<T>>> {
        self.check_element::<T>()?;
        if !self.present.get(index).copied().unwrap_or(false) {
            return Ok(None);
        }
        Ok(self.row_bytes(index).map(bytemuck::pod_collect_to_vec::<u8, T>))
    }

    /// Boolean stream contents (one flag per element, non-zero is true).
    pub fn bools(&self) -> ShmResult<Vec<bool>> {
        if self.element != ElementType::Scalar(ScalarType::Bool) {
            return Err(ShmError::ElementMismatch {
                stream: self.name.clone(),
                actual: self.element.clone(),
                requested: ElementType::Scalar(ScalarType::Bool),
            });
        }
        Ok(self.bytes.iter().map(|b| *b != 0).collect())
    }

    fn check_element<T: Element>(&self) -> ShmResult<()> {
        let requested = T::element_type();
        if requested != self.element {
            return Err(ShmError::ElementMismatch {
                stream: self.name.clone(),
                actual: self.element.clone(),
                requested,
            });
        }
        Ok(())
    }
}

/// Worker-side end of the ring. Exactly one per session.
pub struct RingWriter {
    segment: SharedMemorySegment,
    layout: RingLayout,
    fill_rows: Vec<Vec<u8>>,
    committed: u64,
}

impl RingWriter {
    /// Take the writing end of `segment`, which must match `layout`.
    pub fn new(segment: SharedMemorySegment, layout: RingLayout) -> ShmResult<Self> {
        check_layout(&segment, &layout)?;
        let committed = segment.header().write_counter.load(Ordering::Acquire);
        segment
            .header()
            .write_claim
            .store(committed, Ordering::Relaxed);
        let fill_rows = layout.streams().iter().map(StreamLayout::fill_row).collect();
        Ok(Self {
            segment,
            layout,
            fill_rows,
            committed,
        })
    }

    /// Commit one row. `values` holds one entry per declared stream, in
    /// declaration order; `None` marks the stream absent for this row.
    ///
    /// Returns the new write counter. The sample is checked in full before
    /// anything is written, so a rejected sample leaves the ring untouched.
    pub fn write(&mut self, time: f64, values: &[Option<&[u8]>]) -> ShmResult<u64> {
        self.check_sample(values)?;

        let w = self.committed;
        let slot = (w % self.layout.capacity() as u64) as usize;
        let base = self.segment.base_ptr_mut();
        let header = self.segment.header();

        header.write_claim.store(w + 1, Ordering::Relaxed);
        fence(Ordering::Release);

        // SAFETY: every offset below lies inside a column sized by the layout
        // the segment was created from (checked in `new`), and `slot < N`.
        unsafe {
            let time_ptr = base.add(self.layout.time_offset() + slot * TIME_SIZE) as *mut f64;
            ptr::write(time_ptr, time);

            for ((stream, value), fill) in self
                .layout
                .streams()
                .iter()
                .zip(values)
                .zip(&self.fill_rows)
            {
                let dst = base.add(stream.data_offset + slot * stream.row_size);
                let (src, present) = match value {
                    Some(bytes) => (bytes.as_ptr(), 1u8),
                    None => (fill.as_ptr(), 0u8),
                };
                ptr::copy_nonoverlapping(src, dst, stream.row_size);
                ptr::write(base.add(stream.presence_offset + slot), present);
            }
        }

        header.write_counter.store(w + 1, Ordering::Release);
        self.committed = w + 1;
        Ok(self.committed)
    }

    /// Rows committed so far.
    #[inline]
    pub fn written(&self) -> u64 {
        self.committed
    }

    /// Layout of the ring.
    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    /// Session header (control words).
    pub fn header(&self) -> &SessionHeader {
        self.segment.header()
    }

    fn check_sample(&self, values: &[Option<&[u8]>]) -> ShmResult<()> {
        let streams = self.layout.streams();
        if values.len() != streams.len() {
            return Err(ShmError::SampleMismatch {
                stream: "*".to_string(),
                reason: format!("{} values for {} streams", values.len(), streams.len()),
            });
        }
        for (stream, value) in streams.iter().zip(values) {
            if let Some(bytes) = value {
                if bytes.len() != stream.row_size {
                    return Err(ShmError::SampleMismatch {
                        stream: stream.spec.name.clone(),
                        reason: format!("{} bytes, expected {}", bytes.len(), stream.row_size),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Consumer-side end of the ring, owning the cursor.
pub struct RingReader {
    segment: SharedMemorySegment,
    layout: RingLayout,
    cursor: u64,
    carried_missed: u64,
}

impl RingReader {
    /// Take the reading end of `segment`; the cursor starts at the current counter.
    pub fn new(segment: SharedMemorySegment, layout: RingLayout) -> ShmResult<Self> {
        check_layout(&segment, &layout)?;
        let cursor = segment.header().write_counter.load(Ordering::Acquire);
        Ok(Self {
            segment,
            layout,
            cursor,
            carried_missed: 0,
        })
    }

    /// Copy every unread row.
    ///
    /// Returns `None` when nothing new was committed. When more than N rows
    /// are pending only the newest N are returned and the rest are counted in
    /// [`Batch::missed`]. Rows lost to a concurrent overwrite during the copy
    /// are counted too; if none survive, the loss is carried into the next
    /// batch.
    pub fn read(&mut self) -> Option<Batch> {
        let n = self.layout.capacity() as u64;
        let w = self.segment.header().write_counter.load(Ordering::Acquire);
        let diff = w.saturating_sub(self.cursor);
        if diff == 0 {
            return None;
        }

        let (start, mut missed) = if diff > n {
            (w - n, diff - n)
        } else {
            (self.cursor, 0)
        };
        let rows = (w - start) as usize;
        let mut batch = self.copy_rows(start, rows);

        fence(Ordering::Acquire);
        let claim = self.segment.header().write_claim.load(Ordering::Relaxed);
        let intact_from = claim.saturating_sub(n);
        if intact_from > start {
            let torn = (intact_from - start).min(rows as u64);
            batch.drop_front(torn as usize);
            missed += torn;
        }

        self.cursor = w;
        missed += std::mem::take(&mut self.carried_missed);
        if batch.is_empty() {
            self.carried_missed = missed;
            return None;
        }
        batch.missed = missed;
        Some(batch)
    }

    /// Skip every unread row. Returns how many rows were skipped.
    pub fn clear(&mut self) -> u64 {
        let w = self.segment.header().write_counter.load(Ordering::Acquire);
        let skipped = w.saturating_sub(self.cursor);
        self.cursor = w;
        self.carried_missed = 0;
        skipped
    }

    /// Rows committed but not yet read (may exceed capacity).
    pub fn pending(&self) -> u64 {
        self.segment
            .header()
            .write_counter
            .load(Ordering::Acquire)
            .saturating_sub(self.cursor)
    }

    /// Current cursor.
    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Layout of the ring.
    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    /// Session header (control words).
    pub fn header(&self) -> &SessionHeader {
        self.segment.header()
    }

    /// Underlying segment.
    pub fn segment(&self) -> &SharedMemorySegment {
        &self.segment
    }

    fn copy_rows(&self, start: u64, rows: usize) -> Batch {
        let n = self.layout.capacity();
        let first = (start % n as u64) as usize;
        let head = rows.min(n - first);
        let tail = rows - head;
        let base = self.segment.base_ptr();

        let mut times = vec![0f64; rows];
        // SAFETY: `first + head <= N` and `tail < N`; all columns hold N rows.
        unsafe {
            let src = base.add(self.layout.time_offset()) as *const f64;
            ptr::copy_nonoverlapping(src.add(first), times.as_mut_ptr(), head);
            ptr::copy_nonoverlapping(src, times.as_mut_ptr().add(head), tail);
        }

        let streams = self
            .layout
            .streams()
            .iter()
            .map(|stream| {
                let presence = copy_column(base, stream.presence_offset, 1, first, head, tail);
                let bytes = copy_column(base, stream.data_offset, stream.row_size, first, head, tail);
                StreamColumn {
                    name: stream.spec.name.clone(),
                    shape: stream.spec.shape.clone(),
                    element: stream.spec.element.clone(),
                    present: presence.into_iter().map(|p| p != 0).collect(),
                    bytes,
                }
            })
            .collect();

        Batch {
            times,
            streams,
            missed: 0,
        }
    }
}

fn copy_column(
    base: *const u8,
    offset: usize,
    row_size: usize,
    first: usize,
    head: usize,
    tail: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; (head + tail) * row_size];
    // SAFETY: see `RingReader::copy_rows`.
    unsafe {
        let src = base.add(offset);
        ptr::copy_nonoverlapping(src.add(first * row_size), out.as_mut_ptr(), head * row_size);
        ptr::copy_nonoverlapping(src, out.as_mut_ptr().add(head * row_size), tail * row_size);
    }
    out
}

fn check_layout(segment: &SharedMemorySegment, layout: &RingLayout) -> ShmResult<()> {
    let found = segment.header().layout_hash;
    if found != layout.layout_hash() {
        return Err(ShmError::LayoutMismatch {
            expected: layout.layout_hash(),
            found,
        });
    }
    if segment.len() != layout.total_size() {
        return Err(ShmError::InvalidSize {
            size: segment.len(),
        });
    }
    Ok(())
}
