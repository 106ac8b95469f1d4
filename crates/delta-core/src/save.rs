//! In-place save of a document into its own file.
//!
//! Every segment of the saved document gets a target offset, its document
//! position. Segments are then written to their targets in an order that never
//! overwrites file bytes a pending segment still has to read:
//!
//! 1. build the plan (segment -> target),
//! 2. move other documents' segments on the file to the new layout, or copy
//!    them into memory when their bytes do not survive,
//! 3. write every segment whose target is not needed by anything pending,
//! 4. retry segments whose target overlaps a range released by a write,
//! 5. break the remaining cycles: copy the blocking parts into memory section
//!    by section, then write,
//! 6. (physical copy, see [`Saver::write_segment`]),
//! 7. replace the content by one segment covering the rewritten file.
//!
//! A written segment is replaced by a space segment of the same length, so
//! document positions and targets stay equal for the whole run.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::AddAssign;

use crate::arena::{DocumentId, FileSourceId, SegmentId};
use crate::errors::{DeltaError, DeltaResult};
use crate::repository::{Payload, RepositoryState};
use crate::segment::SegmentKind;
use crate::window::DeltaDocumentWindow;

#[derive(Debug, Default)]
struct SavePlan {
    targets: HashMap<SegmentId, u64>,
    /// Pending segments by target. Targets of pending segments never collide.
    pending: BTreeMap<u64, SegmentId>,
}

impl SavePlan {
    fn insert(&mut self, segment: SegmentId, target: u64) {
        self.targets.insert(segment, target);
        self.pending.insert(target, segment);
    }

    fn remove(&mut self, segment: SegmentId) {
        if let Some(target) = self.targets.remove(&segment) {
            self.pending.remove(&target);
        }
    }

    #[inline]
    fn contains(&self, segment: SegmentId) -> bool {
        self.targets.contains_key(&segment)
    }

    #[inline]
    fn target(&self, segment: SegmentId) -> u64 {
        *self
            .targets
            .get(&segment)
            .unwrap_or_else(|| panic!("{segment:?} is not part of the save plan"))
    }

    #[inline]
    fn first(&self) -> Option<SegmentId> {
        self.pending.values().next().copied()
    }

    /// Pending segments whose target range may intersect `[start, start + length)`.
    fn candidates(&self, start: u64, length: u64) -> Vec<SegmentId> {
        let from = self
            .pending
            .range(..=start)
            .next_back()
            .map_or(start, |(target, _)| *target);

        self.pending
            .range(from..start + length)
            .map(|(_, segment)| *segment)
            .collect()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Part of another document's file segment after the save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece {
    /// Bytes that survive at `target` of the rewritten file.
    Remap { target: u64, length: u64 },
    /// Bytes that are overwritten or cut off and have to be copied out.
    Preload { position: u64, length: u64 },
}

struct Saver {
    document: DocumentId,
    source: FileSourceId,
    window: DeltaDocumentWindow,
    plan: SavePlan,
    /// File ranges no pending segment reads anymore.
    released: VecDeque<(u64, u64)>,
    limit: u64,
}

impl RepositoryState {
    /// Writes `document` into its file source in place.
    ///
    /// A failure after the first byte was touched poisons the document.
    pub(crate) fn save_document(&mut self, document: DocumentId) -> DeltaResult<()> {
        self.check_document(document)?;

        let source = self
            .document(document)
            .file_source
            .ok_or(DeltaError::NoFileSource)?;
        let file = &self.file_sources.get(source).source;

        if file.is_closed() {
            return Err(io::errors::SourceError::Closed.into());
        }

        if !file.mode().is_writable() {
            return Err(io::errors::SourceError::ReadOnly.into());
        }

        let path = file.path().to_path_buf();

        log::debug!(
            "saving {document:?} ({} bytes) into {}",
            self.document(document).data_length,
            path.display()
        );

        let mut saver = Saver {
            document,
            source,
            window: DeltaDocumentWindow::new(self, document),
            plan: SavePlan::default(),
            released: VecDeque::new(),
            limit: self.config.processing_limit as u64,
        };

        saver.window.reset(self);

        match saver.run(self) {
            Ok(()) => {
                log::debug!("saved {}", path.display());

                Ok(())
            }
            Err(err) => {
                log::error!("saving into {} failed: {err}", path.display());
                self.document_mut(document).poisoned = true;

                Err(err)
            }
        }
    }
}

impl Saver {
    fn run(&mut self, state: &mut RepositoryState) -> DeltaResult<()> {
        self.build_plan(state);
        self.update_other_documents(state)?;
        self.save_in_place(state)?;
        self.process_released(state)?;
        self.process_overlapping(state)?;
        self.finish(state)
    }

    /* ===== PHASE 1 ===== */

    fn build_plan(&mut self, state: &RepositoryState) {
        let mut position = 0;

        for segment in state.document_segments(self.document) {
            let length = state.segments.get(segment).length;

            if length > 0 {
                self.plan.insert(segment, position);
            }

            position.add_assign(length);
        }

        log::trace!("save plan holds {} segments", self.plan.targets.len());
    }

    /* ===== PHASE 2 ===== */

    fn update_other_documents(&mut self, state: &mut RepositoryState) -> DeltaResult<()> {
        for other in state.documents.ids() {
            if other == self.document {
                continue;
            }

            let mut changed = false;

            for segment in state.document_segments(other) {
                if state.segments.get(segment).kind == SegmentKind::File(self.source) {
                    self.update_other_segment(state, other, segment)?;
                    changed = true;
                }
            }

            if changed {
                state.reset_document_pointer(other);

                log::trace!("moved segments of {other:?} to the new layout");
            }
        }

        Ok(())
    }

    /// Splits a foreign segment on the saved file into surviving and lost parts.
    fn pieces(&self, state: &mut RepositoryState, position: u64, length: u64) -> Vec<Piece> {
        let end = position + length;
        let overlapping = state
            .file_sources
            .get_mut(self.source)
            .map
            .overlapping(position, length);
        let mut pieces = Vec::new();
        let mut cursor = position;

        for record in overlapping.into_iter().filter(|record| self.plan.contains(*record)) {
            let data = state.segments.get(record);
            let (record_start, record_end) = (data.start_position, data.end_position());

            if record_end <= cursor {
                continue;
            }

            let from = record_start.max(cursor);
            let to = record_end.min(end);

            if from > cursor {
                pieces.push(Piece::Preload {
                    position: cursor,
                    length: from - cursor,
                });
            }

            pieces.push(Piece::Remap {
                target: self.plan.target(record) + (from - record_start),
                length: to - from,
            });
            cursor = to;

            if cursor == end {
                break;
            }
        }

        if cursor < end {
            pieces.push(Piece::Preload {
                position: cursor,
                length: end - cursor,
            });
        }

        pieces
    }

    fn update_other_segment(
        &mut self,
        state: &mut RepositoryState,
        other: DocumentId,
        segment: SegmentId,
    ) -> DeltaResult<()> {
        let data = state.segments.get(segment);
        let (position, length) = (data.start_position, data.length);
        let pieces = self.pieces(state, position, length);

        if let [Piece::Remap { target, .. }] = pieces.as_slice() {
            state.update_segment(segment, *target, length);

            return Ok(());
        }

        for piece in pieces {
            let replacement = match piece {
                Piece::Remap { target, length } => state.create_file_segment(self.source, target, length),
                Piece::Preload { position, length } => {
                    let mut buf = vec![0; <u64 as TryInto<usize>>::try_into(length)?];

                    state
                        .file_sources
                        .get_mut(self.source)
                        .source
                        .read_at(position, &mut buf)?;

                    let memory = state.open_memory_source_with(Payload::Bytes(&buf));

                    state.create_memory_segment(memory, 0, length)
                }
            };

            state.link_before(other, Some(segment), replacement);
        }

        state.unlink(other, segment);
        state.drop_segment(segment);

        Ok(())
    }

    /* ===== PHASE 3 ===== */

    fn save_in_place(&mut self, state: &mut RepositoryState) -> DeltaResult<()> {
        for segment in state.document_segments(self.document) {
            if !self.plan.contains(segment) {
                continue;
            }

            let data = state.segments.get(segment);

            if data.kind == SegmentKind::File(self.source) && data.start_position == self.plan.target(segment) {
                self.mark_done(state, segment);
            } else if !self.is_blocked(state, segment) {
                self.write_segment(state, segment)?;
                self.complete(state, segment);
            }
        }

        Ok(())
    }

    /// Whether writing `segment` would destroy bytes another pending segment reads.
    fn is_blocked(&self, state: &mut RepositoryState, segment: SegmentId) -> bool {
        !self.blockers(state, segment).is_empty()
    }

    fn blockers(&self, state: &mut RepositoryState, segment: SegmentId) -> Vec<SegmentId> {
        let target = self.plan.target(segment);
        let length = state.segments.get(segment).length;

        state
            .file_sources
            .get_mut(self.source)
            .map
            .overlapping(target, length)
            .into_iter()
            .filter(|other| *other != segment && self.plan.contains(*other))
            .collect()
    }

    /* ===== PHASE 4 ===== */

    fn process_released(&mut self, state: &mut RepositoryState) -> DeltaResult<()> {
        while let Some((start, length)) = self.released.pop_front() {
            for segment in self.plan.candidates(start, length) {
                if !self.plan.contains(segment) {
                    continue;
                }

                let target = self.plan.target(segment);
                let end = target + state.segments.get(segment).length;

                if end <= start || target >= start + length || self.is_blocked(state, segment) {
                    continue;
                }

                self.write_segment(state, segment)?;
                self.complete(state, segment);
            }
        }

        Ok(())
    }

    /* ===== PHASE 5 ===== */

    fn process_overlapping(&mut self, state: &mut RepositoryState) -> DeltaResult<()> {
        while let Some(segment) = self.plan.first() {
            if self.is_blocked(state, segment) {
                let target = self.plan.target(segment);

                if state.segments.get(segment).length > self.limit {
                    self.split_pending(state, target + self.limit)?;
                }

                self.preload_blockers(state, segment)?;
            }

            self.write_segment(state, segment)?;
            self.complete(state, segment);
            self.process_released(state)?;
        }

        Ok(())
    }

    /// Splits the pending segment covering `position`. The new tail keeps
    /// its place in the plan.
    fn split_pending(&mut self, state: &mut RepositoryState, position: u64) -> DeltaResult<()> {
        let Some(segment) = self.window.focus_segment(state, position)? else {
            return Ok(());
        };

        if self.window.pointer().position == position {
            return Ok(());
        }

        self.window.split_segment(state, position)?;

        if self.plan.contains(segment) {
            let tail = state
                .segments
                .get(segment)
                .next
                .expect("split leaves a tail segment");

            self.plan.insert(tail, position);
        }

        Ok(())
    }

    /// Copies every part of the file that `segment` is about to overwrite and
    /// that a pending segment still reads into memory.
    fn preload_blockers(&mut self, state: &mut RepositoryState, segment: SegmentId) -> DeltaResult<()> {
        let target = self.plan.target(segment);
        let end = target + state.segments.get(segment).length;

        for blocker in self.blockers(state, segment) {
            if !self.plan.contains(blocker) {
                continue;
            }

            let data = state.segments.get(blocker);
            let (start, blocker_end) = (data.start_position, data.end_position());
            let from = start.max(target);
            let to = blocker_end.min(end);

            if from >= to {
                continue;
            }

            let blocker_target = self.plan.target(blocker);
            let part_target = blocker_target + (from - start);

            self.split_pending(state, part_target)?;
            self.split_pending(state, part_target + (to - from))?;

            let part = *self
                .plan
                .pending
                .get(&part_target)
                .expect("split part is pending");
            let mut buf = vec![0; <u64 as TryInto<usize>>::try_into(to - from)?];

            state
                .file_sources
                .get_mut(self.source)
                .source
                .read_at(from, &mut buf)?;

            let memory = state.open_memory_source_with(Payload::Bytes(&buf));
            let preloaded = state.create_memory_segment(memory, 0, to - from);

            self.window.replace_linked(state, part, preloaded);
            state.drop_segment(part);
            self.plan.remove(part);
            self.plan.insert(preloaded, part_target);

            log::trace!("preloaded {} bytes at {from} blocking target {target}", to - from);
        }

        Ok(())
    }

    /* ===== PHASE 6 ===== */

    /// Copies the bytes of `segment` to its target offset.
    fn write_segment(&mut self, state: &mut RepositoryState, segment: SegmentId) -> DeltaResult<()> {
        let data = state.segments.get(segment);
        let (kind, start, length) = (data.kind, data.start_position, data.length);
        let target = self.plan.target(segment);
        let chunk = self.limit.min(length);
        let mut buf = vec![0; <u64 as TryInto<usize>>::try_into(chunk)?];

        let mut offsets: Vec<u64> = (0..length).step_by(<u64 as TryInto<usize>>::try_into(self.limit)?).collect();

        match kind {
            SegmentKind::File(source) if source == self.source => {
                if start == target {
                    return Ok(());
                }

                // Moving forward over itself, copy from the back.
                if target > start && start + length > target {
                    offsets.reverse();
                }
            }
            SegmentKind::File(_) | SegmentKind::Memory(_) => {}
            SegmentKind::Space => panic!("space segment {segment:?} in the save plan"),
        }

        for offset in offsets {
            let size = <u64 as TryInto<usize>>::try_into(chunk.min(length - offset))?;
            let part = &mut buf[..size];

            state.read_source(kind, start + offset, part)?;
            state
                .file_sources
                .get_mut(self.source)
                .source
                .write_at(target + offset, part)?;
        }

        log::trace!("wrote {length} bytes of {segment:?} at {target}");

        Ok(())
    }

    /// Marks a written segment done and releases its file range.
    fn complete(&mut self, state: &mut RepositoryState, segment: SegmentId) {
        let data = state.segments.get(segment);

        if data.kind == SegmentKind::File(self.source) {
            self.released.push_back((data.start_position, data.length));
        }

        self.mark_done(state, segment);
    }

    fn mark_done(&mut self, state: &mut RepositoryState, segment: SegmentId) {
        let length = state.segments.get(segment).length;
        let space = state.create_space_segment(length);

        self.window.replace_linked(state, segment, space);
        state.drop_segment(segment);
        self.plan.remove(segment);
    }

    /* ===== PHASE 7 ===== */

    fn finish(&mut self, state: &mut RepositoryState) -> DeltaResult<()> {
        assert!(self.plan.is_empty(), "save finished with pending segments");

        for segment in state.document_segments(self.document) {
            state.unlink(self.document, segment);
            state.drop_segment(segment);
        }

        let size = state.document(self.document).data_length;
        let sync = state.config.sync_on_save;
        let file = &mut state.file_sources.get_mut(self.source).source;

        file.set_file_length(size)?;
        file.clear_cache();

        if sync {
            file.sync()?;
        }

        if size > 0 {
            let segment = state.create_file_segment(self.source, 0, size);

            state.link_before(self.document, None, segment);
        }

        state.reset_document_pointer(self.document);

        Ok(())
    }
}
