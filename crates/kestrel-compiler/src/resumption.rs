//! Resumption-point bookkeeping.
//!
//! Every function gets an implicit entry point `0.0`. Offset 0 of every other
//! segment is reserved: segments are entered by plain jumps, never by
//! dispatch. Every suspending operation allocates the next offset in the
//! segment it was emitted into. Dispatch is two-level: the segment number
//! selects a per-segment table, and the offset selects the point inside it.

use kestrel_ir::Slot;

use crate::code::{CodeAddr, PointId};
use crate::errors::{CompilationErrorKind, CompilationResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointKind {
    /// Function entry; never the target of a snapshot.
    Entry,
    /// Re-entry just after an operation that may suspend.
    Suspend,
}

/// Information about a single resumption point.
#[derive(Clone, Debug, PartialEq)]
pub struct ResumePoint {
    pub id: PointId,
    pub addr: CodeAddr,
    /// Slots captured into the snapshot when suspending here, ascending.
    pub live: Vec<Slot>,
    pub kind: PointKind,
}

#[derive(Clone, Debug)]
pub struct ResumptionTable {
    points: Vec<ResumePoint>,
    /// `segments[s][offset - 1]` indexes into `points`.
    segments: Vec<Vec<usize>>,
}

impl Default for ResumptionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumptionTable {
    /// A table holding only the function entry.
    pub fn new() -> Self {
        Self {
            points: vec![ResumePoint {
                id: PointId::ENTRY,
                addr: CodeAddr::new(0, 0),
                live: Vec::new(),
                kind: PointKind::Entry,
            }],
            segments: vec![Vec::new()],
        }
    }

    /// Open the next segment.
    pub fn begin_segment(&mut self) -> CompilationResult<u16> {
        let index = self.segments.len();
        let segment =
            u16::try_from(index).map_err(|_| CompilationErrorKind::TooManySegments(index))?;
        self.segments.push(Vec::new());
        Ok(segment)
    }

    /// Allocate the next point in `segment`. Its address is set by
    /// [`bind_label`](Self::bind_label) once the operation has been emitted.
    pub fn new_resumption_point(
        &mut self,
        segment: u16,
        live: Vec<Slot>,
    ) -> CompilationResult<PointId> {
        let offsets = self
            .segments
            .get_mut(segment as usize)
            .ok_or(CompilationErrorKind::TooManySegments(segment as usize))?;
        let offset = u16::try_from(offsets.len() + 1)
            .map_err(|_| CompilationErrorKind::TooManyPoints(segment))?;
        let id = PointId::new(segment, offset);
        offsets.push(self.points.len());
        self.points.push(ResumePoint {
            id,
            addr: CodeAddr::new(segment, 0),
            live,
            kind: PointKind::Suspend,
        });
        Ok(id)
    }

    pub fn bind_label(&mut self, point: PointId, pc: u32) {
        if let Some(index) = self.index_of(point) {
            self.points[index].addr.pc = pc;
        }
    }

    /// True iff at least one point beyond the entry was allocated.
    pub fn is_resumable(&self) -> bool {
        self.points.iter().any(|p| p.kind == PointKind::Suspend)
    }

    /// Look up where `point` re-enters the function. `None` means the id was
    /// never allocated, which only a corrupted snapshot can produce.
    pub fn dispatch(&self, point: PointId) -> Option<&ResumePoint> {
        self.index_of(point).map(|index| &self.points[index])
    }

    pub fn points(&self) -> impl Iterator<Item = &ResumePoint> {
        self.points.iter()
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    fn index_of(&self, point: PointId) -> Option<usize> {
        if point == PointId::ENTRY {
            return Some(0);
        }
        let offsets = self.segments.get(point.segment() as usize)?;
        let offset = (point.offset() as usize).checked_sub(1)?;
        offsets.get(offset).copied()
    }
}
