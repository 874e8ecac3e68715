//! The executor.
//!
//! Replays a compiled frame into the backend: opens encoders lazily through an encoder
//! manager, interleaves each pass's recorded commands with the compacted resource
//! commands scheduled inside its command range, closes command buffers at the compiler's
//! boundaries and submits them in order with one timeline signal value each. When the
//! backend reports the last command buffer of the frame as complete, the frame counter
//! advances and the inflight semaphore is released.
//!
//! Placements use a total order over `(command index, before/after)`. `Before`
//! placements flush just before their command; `After` placements flush after it, except
//! inside render passes where they are deferred until the render pass closes (a pipeline
//! barrier cannot be recorded mid-render-pass unless it is a subpass self-dependency,
//! which the analyzer schedules as a `Before` placement).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::backend::{Backend, CompactedResourceCommand, PlacementOrder, ResourceCommand};
use crate::core::context::Context;
use crate::graph::compile::{EncoderKind, FrameCommandInfo, ENCODER_NONE};
use crate::graph::pass::RenderPassRecord;
use crate::graph::record::FrameCommand;
use crate::graph::FrameGraph;
use crate::sync::queue::Queue;

/// Total order of a placement point in the frame command stream.
fn placement_key(command: u32, order: PlacementOrder) -> u64 {
    ((command as u64) << 1)
        | match order {
            PlacementOrder::Before => 0,
            PlacementOrder::After => 1,
        }
}

struct FrameRun<'a> {
    context: Context,
    backend: Arc<dyn Backend>,
    info: &'a FrameCommandInfo,
    /// Cursor into the sorted compacted resource commands.
    cursor: usize,
    /// Index of the most recently replayed frame command.
    last_recorded: Option<u32>,
    current_encoder: Option<u32>,
    open_command_buffer: Option<(u32, Queue)>,
    /// Command buffers closed this frame, in submission order.
    submissions: Vec<(u32, Queue)>,
}

impl FrameRun<'_> {
    fn apply(&mut self, command: &CompactedResourceCommand) -> Result<()> {
        match &command.command_data {
            ResourceCommand::MaterialiseBuffer {
                buffer,
                usage,
            } => {
                let descriptor = self
                    .context
                    .descriptor(*buffer)
                    .as_buffer()
                    .copied()
                    .expect("materialise command for a non-buffer handle");
                self.backend.materialise_buffer(*buffer, &descriptor, *usage)?;
                // Deferred slice actions run between allocation and the buffer's first
                // command.
                for action in self.context.take_deferred_slices(*buffer) {
                    let len = (action.range.end - action.range.start) as usize;
                    let pointer = self.backend.map_buffer(*buffer, action.range.clone())?;
                    let bytes =
                        unsafe { std::slice::from_raw_parts_mut(pointer.as_ptr(), len) };
                    (action.apply)(*buffer, bytes);
                }
            }
            ResourceCommand::MaterialiseTexture {
                texture,
                usage,
            } => {
                let descriptor = self
                    .context
                    .descriptor(*texture)
                    .as_texture()
                    .copied()
                    .expect("materialise command for a non-texture handle");
                self.backend.materialise_texture(*texture, &descriptor, *usage)?;
            }
            ResourceCommand::DisposeResource {
                resource,
            } => {
                self.backend.dispose_resource(*resource);
            }
            other => {
                self.backend.record_resource_command(other)?;
            }
        }
        Ok(())
    }

    /// Apply every pending resource command up to and including `limit`.
    fn flush_up_to(&mut self, limit: u64) -> Result<()> {
        while let Some(command) = self.info.resource_commands.get(self.cursor) {
            if placement_key(command.command, command.order) > limit {
                break;
            }
            self.cursor += 1;
            // Split the borrow: `apply` needs `&mut self`.
            let command = &self.info.resource_commands[self.cursor - 1];
            self.apply(command)?;
        }
        Ok(())
    }

    fn flush_rest(&mut self) -> Result<()> {
        self.flush_up_to(u64::MAX)
    }

    fn close_encoder(&mut self) -> Result<()> {
        let Some(encoder) = self.current_encoder.take() else {
            return Ok(());
        };
        match self.info.encoders[encoder as usize].kind {
            EncoderKind::Draw => self.backend.end_render_pass(),
            _ => self.backend.end_encoder(),
        }
        // Resource commands deferred past the encoder's last command land here, still
        // inside the encoder's command buffer.
        if let Some(last) = self.last_recorded {
            self.flush_up_to(placement_key(last, PlacementOrder::After))?;
        }
        Ok(())
    }

    fn close_command_buffer(&mut self) {
        if let Some((index, queue)) = self.open_command_buffer.take() {
            self.backend.end_command_buffer(index);
            self.submissions.push((index, queue));
        }
    }

    fn ensure_command_buffer(&mut self, index: u32, queue: &Queue) {
        if self.open_command_buffer.as_ref().map(|(open, _)| *open) == Some(index) {
            return;
        }
        self.close_command_buffer();
        self.backend.begin_command_buffer(index, queue);
        self.open_command_buffer = Some((index, queue.clone()));
    }

    fn open_encoder(&mut self, encoder_index: u32) -> Result<()> {
        let encoder = &self.info.encoders[encoder_index as usize];
        match encoder.kind {
            EncoderKind::Draw => {
                let render_pass = encoder.render_pass.expect("draw encoder without render pass");
                self.backend
                    .begin_render_pass(&self.info.render_passes[render_pass as usize])?;
            }
            kind => self.backend.begin_encoder(kind),
        }
        self.current_encoder = Some(encoder_index);
        Ok(())
    }

    fn run_pass(
        &mut self,
        pass: &mut RenderPassRecord,
        encoder_index: u32,
        commands: &[FrameCommand],
    ) -> Result<()> {
        if encoder_index == ENCODER_NONE {
            // CPU work is ordered between encoders, never inside one.
            self.close_encoder()?;
            if let Some(work) = pass.cpu_work.take() {
                work();
            }
            return Ok(());
        }

        let encoder = &self.info.encoders[encoder_index as usize];
        let is_draw = encoder.kind == EncoderKind::Draw;

        if self.current_encoder == Some(encoder_index) {
            if is_draw {
                self.backend.next_subpass();
            }
            self.flush_up_to(placement_key(pass.commands.start, PlacementOrder::Before))?;
        } else {
            self.close_encoder()?;
            self.ensure_command_buffer(encoder.command_buffer, &encoder.queue);
            // Barriers attached to the first command of a render pass record before the
            // render pass begins.
            self.flush_up_to(placement_key(pass.commands.start, PlacementOrder::Before))?;
            self.open_encoder(encoder_index)?;
        }

        for index in pass.commands.clone() {
            self.flush_up_to(placement_key(index, PlacementOrder::Before))?;
            self.backend.record_command(&commands[index as usize])?;
            self.last_recorded = Some(index);
            let is_last = index + 1 == pass.commands.end;
            if !(is_draw && is_last) {
                self.flush_up_to(placement_key(index, PlacementOrder::After))?;
            }
        }
        Ok(())
    }
}

impl FrameGraph {
    /// Execute the recorded frame: compile, replay into the backend, submit, and cycle
    /// frame state. With no passes recorded this still cycles state and releases the
    /// inflight slot, emitting no backend commands.
    pub fn execute(&mut self) -> Result<()> {
        self.begin_recording();
        let frame = self.frame_index;
        let result = self.run_frame(frame);
        self.cycle_frame();
        result
    }

    fn run_frame(&mut self, frame: u64) -> Result<()> {
        let callbacks = std::mem::take(&mut self.completion_callbacks);

        // Everything up to submission can abort the frame; nothing else would ever
        // complete an aborted frame, so release its waiters before propagating.
        let submissions = match self.replay(frame) {
            Ok(submissions) => submissions,
            Err(err) => {
                error!("frame {frame} aborted: {err}");
                self.context.frame_completion().advance_to(frame);
                self.inflight.signal();
                for callback in callbacks {
                    callback();
                }
                return Err(err);
            }
        };

        // From here on completion is accounted per command buffer.
        if submissions.is_empty() {
            self.context.frame_completion().advance_to(frame);
            self.inflight.signal();
            for callback in callbacks {
                callback();
            }
            return Ok(());
        }
        self.submit_all(frame, submissions, callbacks)
    }

    /// Compile the frame and replay it into the backend, returning the command buffers
    /// to submit. Also stamps wait frames on the persistent resources this frame touched.
    fn replay(&mut self, frame: u64) -> Result<Vec<(u32, Queue)>> {
        let info = self.compile()?;
        let context = self.context.clone();
        let backend = context.backend().clone();

        if info.active_passes.is_empty() {
            return Ok(Vec::new());
        }

        backend.prepare_events(info.event_count);

        let mut run = FrameRun {
            context: context.clone(),
            backend,
            info: &info,
            cursor: 0,
            last_recorded: None,
            current_encoder: None,
            open_command_buffer: None,
            submissions: Vec::new(),
        };

        let commands = std::mem::take(&mut self.commands);
        let mut result = Ok(());
        for (sequence, &pass_index) in info.active_passes.iter().enumerate() {
            let pass = &mut self.passes[pass_index as usize];
            result = run.run_pass(pass, info.pass_encoders[sequence], &commands);
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = run.close_encoder().and_then(|_| run.flush_rest());
        }
        run.close_command_buffer();
        let submissions = std::mem::take(&mut run.submissions);
        drop(run);
        self.commands = commands;
        result?;

        // Persistent resources touched this frame pick up their wait stamps before
        // anything is submitted, so a CPU access racing the submit still blocks.
        for (handle, read, written) in &info.wait_stamps {
            context.stamp_wait_frames(*handle, read.then_some(frame), written.then_some(frame));
        }

        Ok(submissions)
    }

    fn submit_all(
        &mut self,
        frame: u64,
        submissions: Vec<(u32, Queue)>,
        callbacks: Vec<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        let backend = self.context.backend().clone();

        let callbacks = Arc::new(Mutex::new(callbacks));
        let remaining = Arc::new(AtomicUsize::new(submissions.len()));
        let mut submit_error = None;
        for (index, queue) in submissions {
            let signal_value = queue.advance_submitted();
            if submit_error.is_some() {
                // An earlier submission failed; account for the buffers we will never
                // submit so the frame still completes.
                Self::complete_one(&self.context, &self.inflight, &remaining, &callbacks, frame);
                continue;
            }
            let completion_context = self.context.clone();
            let inflight = self.inflight.clone();
            let remaining_for_callback = remaining.clone();
            let callbacks_for_callback = callbacks.clone();
            let callback_queue = queue.clone();
            let callback = Box::new(move |result: Result<()>| {
                if let Err(err) = result {
                    error!("command buffer completed with error: {err}");
                }
                callback_queue.mark_completed(signal_value);
                Self::complete_one(
                    &completion_context,
                    &inflight,
                    &remaining_for_callback,
                    &callbacks_for_callback,
                    frame,
                );
            });
            if let Err(err) = backend.submit(index, &queue, signal_value, callback) {
                // The callback is not invoked on a failed submit.
                Self::complete_one(&self.context, &self.inflight, &remaining, &callbacks, frame);
                submit_error = Some(err);
            }
        }

        match submit_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn complete_one(
        context: &Context,
        inflight: &crate::sync::frame_completion::InflightFrameSemaphore,
        remaining: &Arc<AtomicUsize>,
        callbacks: &Arc<Mutex<Vec<Box<dyn FnOnce() + Send>>>>,
        frame: u64,
    ) {
        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            context.frame_completion().advance_to(frame);
            inflight.signal();
            for callback in callbacks.lock().unwrap().drain(..) {
                callback();
            }
        }
    }

    /// Reset per-frame state: recycle transient indices, drop usage lists, drain
    /// completed disposals and advance to the next frame number.
    fn cycle_frame(&mut self) {
        self.context.transient_registry().cycle_frames();
        self.context.persistent_registry().clear_usages();
        self.context.drain_disposes();
        self.passes.clear();
        self.commands.clear();
        self.recording = false;
        self.frame_index += 1;
    }
}
