// SPDX-License-Identifier: GPL-2.0

//! Simulated display pipeline for tests.
//!
//! Scanout load is the summed pixel area of the planes on the bound pipe.
//! With the load tracker armed, a commit above the budget is refused with
//! ENOSPC. Any configuration above the budget that does get applied raises
//! the underrun flag, like a starved HVS would.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;
use kms_utils::BufferHandle;
use kms_utils::ConnectorState;
use kms_utils::DebugCounters;
use kms_utils::DisplayOps;
use kms_utils::Mode;
use kms_utils::OutputId;
use kms_utils::PipeId;
use kms_utils::PixelFormat;
use kms_utils::PlaneId;
use kms_utils::PlaneInfo;
use kms_utils::PlaneKind;

use crate::prober::LOAD_TRACKER;
use crate::prober::UNDERRUN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SetLoadTracker(bool),
    TryCommit,
    Commit,
    Vblank,
    ReadUnderrun,
}

#[derive(Debug, Default)]
struct Shared {
    load_tracker: bool,
    underrun: bool,
    events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct SimOutput {
    name: String,
    state: ConnectorState,
    mode: Option<Mode>,
}

impl SimOutput {
    pub fn connected(name: &str, mode: Mode) -> Self {
        Self {
            name: name.to_string(),
            state: ConnectorState::Connected,
            mode: Some(mode),
        }
    }

    pub fn connected_without_mode(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ConnectorState::Connected,
            mode: None,
        }
    }

    pub fn disconnected(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ConnectorState::Disconnected,
            mode: None,
        }
    }

    pub fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ConnectorState::Unknown,
            mode: None,
        }
    }
}

#[derive(Default)]
pub struct SimDisplayBuilder {
    pipes: Vec<Vec<PlaneKind>>,
    outputs: Vec<(SimOutput, PipeId)>,
    budget: Option<u64>,
    atomic: Option<bool>,
}

impl SimDisplayBuilder {
    /// Add a pipe with the given plane slots driving `outputs`.
    pub fn pipe(mut self, planes: &[PlaneKind], outputs: Vec<SimOutput>) -> Self {
        let pipe = PipeId(self.pipes.len() as u32);
        self.pipes.push(planes.to_vec());
        self.outputs
            .extend(outputs.into_iter().map(|output| (output, pipe)));
        self
    }

    /// Pixels the pipe can scan out without underrunning.
    pub fn bandwidth_budget(mut self, pixels: u64) -> Self {
        self.budget = Some(pixels);
        self
    }

    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = Some(atomic);
        self
    }

    pub fn build(self) -> SimDisplay {
        let mut plane_kinds = Vec::new();
        let mut pipes = Vec::new();
        for kinds in self.pipes {
            let mut ids = Vec::new();
            for kind in kinds {
                ids.push(PlaneId(plane_kinds.len() as u32));
                plane_kinds.push(kind);
            }
            pipes.push(ids);
        }

        SimDisplay {
            shared: Rc::new(RefCell::new(Shared::default())),
            atomic: self.atomic.unwrap_or(true),
            budget: self.budget.unwrap_or(u64::MAX),
            pipes,
            plane_kinds,
            outputs: self.outputs,
            binding: None,
            buffers: BTreeMap::new(),
            staged: BTreeMap::new(),
            next_buffer: 1,
            created: Vec::new(),
            released: Vec::new(),
            alloc_limit: None,
            commit_errno: None,
            vblank_broken: false,
            active: false,
            max_overlays: 0,
            primary_always_bound: true,
        }
    }
}

pub struct SimDisplay {
    shared: Rc<RefCell<Shared>>,
    atomic: bool,
    budget: u64,
    pipes: Vec<Vec<PlaneId>>,
    plane_kinds: Vec<PlaneKind>,
    outputs: Vec<(SimOutput, PipeId)>,
    binding: Option<(OutputId, PipeId)>,
    buffers: BTreeMap<BufferHandle, (u32, u32)>,
    staged: BTreeMap<PlaneId, BufferHandle>,
    next_buffer: u32,
    created: Vec<(u32, u32)>,
    released: Vec<BufferHandle>,
    alloc_limit: Option<usize>,
    commit_errno: Option<i32>,
    vblank_broken: bool,
    active: bool,
    max_overlays: usize,
    primary_always_bound: bool,
}

impl SimDisplay {
    pub fn builder() -> SimDisplayBuilder {
        SimDisplayBuilder::default()
    }

    /// Debugfs counters wired to this display.
    pub fn counters(&self) -> SimCounters {
        let values = [(LOAD_TRACKER, "N"), (UNDERRUN, "N")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SimCounters {
            shared: Rc::clone(&self.shared),
            values,
            forced_underrun: None,
            reads_left: RefCell::new(HashMap::new()),
            writes: 0,
            write_limit: None,
        }
    }

    pub fn binding(&self) -> Option<(OutputId, PipeId)> {
        self.binding
    }

    /// Make every `try_commit` fail with `errno`.
    pub fn inject_commit_errno(&mut self, errno: Option<i32>) {
        self.commit_errno = errno;
    }

    /// Make every vblank wait fail.
    pub fn break_vblank(&mut self) {
        self.vblank_broken = true;
    }

    /// Let `count` allocations succeed, then fail the rest.
    pub fn fail_allocation_after(&mut self, count: usize) {
        self.alloc_limit = Some(count);
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers_created(&self) -> usize {
        self.created.len()
    }

    pub fn created(&self) -> &[(u32, u32)] {
        &self.created
    }

    pub fn released(&self) -> &[BufferHandle] {
        &self.released
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.borrow().events.clone()
    }

    pub fn max_overlays_committed(&self) -> usize {
        self.max_overlays
    }

    pub fn primary_bound_in_every_commit(&self) -> bool {
        self.primary_always_bound
    }

    fn bound_pipe(&self) -> io::Result<PipeId> {
        self.binding
            .map(|(_, pipe)| pipe)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no output bound"))
    }

    fn staged_on(&self, pipe: PipeId) -> impl Iterator<Item = (PlaneKind, (u32, u32))> + '_ {
        self.pipes[pipe.0 as usize].iter().filter_map(move |plane| {
            let buffer = self.staged.get(plane)?;
            let size = self.buffers.get(buffer)?;
            Some((self.plane_kinds[plane.0 as usize], *size))
        })
    }

    fn load(&self, pipe: PipeId) -> u64 {
        self.staged_on(pipe)
            .map(|(_, (w, h))| w as u64 * h as u64)
            .fold(0u64, |acc, px| acc.saturating_add(px))
    }

    fn observe(&mut self, pipe: PipeId) {
        let overlays = self
            .staged_on(pipe)
            .filter(|(kind, _)| *kind == PlaneKind::Overlay)
            .count();
        let primary = self
            .staged_on(pipe)
            .any(|(kind, _)| kind == PlaneKind::Primary);
        self.max_overlays = self.max_overlays.max(overlays);
        self.primary_always_bound &= primary;
    }

    fn apply(&mut self, pipe: PipeId) {
        let over = self.load(pipe) > self.budget;
        self.active = true;
        self.shared.borrow_mut().underrun = over;
    }

    fn record(&self, event: Event) {
        self.shared.borrow_mut().events.push(event);
    }
}

impl DisplayOps for SimDisplay {
    fn is_atomic(&self) -> bool {
        self.atomic
    }

    fn pipes(&self) -> Vec<PipeId> {
        (0..self.pipes.len() as u32).map(PipeId).collect()
    }

    fn outputs_for_pipe(&self, pipe: PipeId) -> Vec<OutputId> {
        self.outputs
            .iter()
            .enumerate()
            .filter(|(_, (_, p))| *p == pipe)
            .map(|(idx, _)| OutputId(idx as u32))
            .collect()
    }

    fn connector_state(&self, output: OutputId) -> ConnectorState {
        self.outputs
            .get(output.0 as usize)
            .map(|(out, _)| out.state)
            .unwrap_or(ConnectorState::Unknown)
    }

    fn connector_type_name(&self, output: OutputId) -> String {
        self.outputs
            .get(output.0 as usize)
            .map(|(out, _)| out.name.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    fn bind_output(&mut self, output: OutputId, pipe: PipeId) -> Result<()> {
        let (_, p) = self
            .outputs
            .get(output.0 as usize)
            .ok_or_else(|| anyhow!("no output {:?}", output))?;
        if *p != pipe {
            bail!("output {:?} not drivable by pipe {}", output, pipe);
        }
        self.binding = Some((output, pipe));
        Ok(())
    }

    fn output_mode(&self, output: OutputId) -> Option<Mode> {
        self.outputs.get(output.0 as usize)?.0.mode
    }

    fn planes(&self, pipe: PipeId) -> Vec<PlaneInfo> {
        self.pipes
            .get(pipe.0 as usize)
            .map(|ids| {
                ids.iter()
                    .map(|&id| PlaneInfo {
                        id,
                        kind: self.plane_kinds[id.0 as usize],
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn create_pattern_buffer(
        &mut self,
        width: u32,
        height: u32,
        _format: PixelFormat,
    ) -> Result<BufferHandle> {
        if width == 0 || height == 0 {
            bail!("zero sized buffer");
        }
        if let Some(limit) = self.alloc_limit {
            if self.created.len() >= limit {
                bail!("out of CMA memory");
            }
        }
        let handle = BufferHandle(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(handle, (width, height));
        self.created.push((width, height));
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.buffers
            .remove(&buffer)
            .ok_or_else(|| anyhow!("unknown buffer {:?}", buffer))?;
        self.staged.retain(|_, staged| *staged != buffer);
        self.released.push(buffer);
        Ok(())
    }

    fn set_plane_buffer(&mut self, plane: PlaneId, buffer: Option<BufferHandle>) -> Result<()> {
        if plane.0 as usize >= self.plane_kinds.len() {
            bail!("no plane {:?}", plane);
        }
        match buffer {
            Some(buffer) => {
                if !self.buffers.contains_key(&buffer) {
                    bail!("unknown buffer {:?}", buffer);
                }
                self.staged.insert(plane, buffer);
            }
            None => {
                self.staged.remove(&plane);
            }
        }
        Ok(())
    }

    fn try_commit(&mut self) -> io::Result<()> {
        self.record(Event::TryCommit);
        let pipe = self.bound_pipe()?;
        if let Some(errno) = self.commit_errno {
            return Err(io::Error::from_raw_os_error(errno));
        }
        self.observe(pipe);
        if self.shared.borrow().load_tracker && self.load(pipe) > self.budget {
            return Err(io::Error::from_raw_os_error(libc::ENOSPC));
        }
        self.apply(pipe);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.record(Event::Commit);
        let pipe = self.bound_pipe()?;
        self.observe(pipe);
        self.apply(pipe);
        Ok(())
    }

    fn wait_for_vblank(&mut self, pipe: PipeId) -> Result<()> {
        self.record(Event::Vblank);
        if self.vblank_broken {
            bail!("vblank wait timed out on pipe {}", pipe);
        }
        if !self.active {
            bail!("pipe {} is not running", pipe);
        }
        if self.bound_pipe()? != pipe {
            bail!("pipe {} is not driving the bound output", pipe);
        }
        Ok(())
    }
}

pub struct SimCounters {
    shared: Rc<RefCell<Shared>>,
    values: HashMap<String, String>,
    forced_underrun: Option<String>,
    reads_left: RefCell<HashMap<String, usize>>,
    writes: usize,
    write_limit: Option<usize>,
}

impl SimCounters {
    /// Report `value` for the underrun entry regardless of the pipe's state.
    pub fn force_underrun(&mut self, value: Option<&str>) {
        self.forced_underrun = value.map(str::to_string);
    }

    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
    }

    /// Let `name` be read `reads` more times before it disappears.
    pub fn vanish_after_reads(&mut self, name: &str, reads: usize) {
        self.reads_left.borrow_mut().insert(name.to_string(), reads);
    }

    /// Let `count` writes succeed, then fail the rest.
    pub fn fail_writes_after(&mut self, count: usize) {
        self.write_limit = Some(count);
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl DebugCounters for SimCounters {
    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        if !self.values.contains_key(name) {
            bail!("no debugfs entry {}", name);
        }
        if let Some(limit) = self.write_limit {
            if self.writes >= limit {
                bail!("write to {} failed: EIO", name);
            }
        }
        self.writes += 1;
        self.values.insert(name.to_string(), value.to_string());
        if name == LOAD_TRACKER {
            let on = value.starts_with('Y');
            let mut shared = self.shared.borrow_mut();
            shared.load_tracker = on;
            shared.events.push(Event::SetLoadTracker(on));
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<String>> {
        if name == UNDERRUN {
            self.shared.borrow_mut().events.push(Event::ReadUnderrun);
        }
        if let Some(left) = self.reads_left.borrow_mut().get_mut(name) {
            if *left == 0 {
                return Ok(None);
            }
            *left -= 1;
        }
        if !self.values.contains_key(name) {
            return Ok(None);
        }
        if name == UNDERRUN {
            let value = match &self.forced_underrun {
                Some(forced) => forced.clone(),
                None if self.shared.borrow().underrun => "Y\n".to_string(),
                None => "N\n".to_string(),
            };
            return Ok(Some(value));
        }
        Ok(self.values.get(name).cloned())
    }
}
