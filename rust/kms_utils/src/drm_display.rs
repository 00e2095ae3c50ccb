// SPDX-License-Identifier: GPL-2.0
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsFd;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use drm::buffer::Buffer as _;
use drm::buffer::DrmFourcc;
use drm::control::atomic::AtomicModeReq;
use drm::control::connector;
use drm::control::crtc;
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::framebuffer;
use drm::control::plane;
use drm::control::property;
use drm::control::AtomicCommitFlags;
use drm::control::Device as ControlDevice;
use drm::control::ModeTypeFlags;
use drm::control::ResourceHandle;
use drm::ClientCapability;
use drm::SystemError;
use drm::Device;
use drm::VblankWaitFlags;
use drm::VblankWaitTarget;
use log::debug;
use log::warn;

use crate::display::BufferHandle;
use crate::display::ConnectorState;
use crate::display::DisplayOps;
use crate::display::Mode;
use crate::display::OutputId;
use crate::display::PipeId;
use crate::display::PixelFormat;
use crate::display::PlaneId;
use crate::display::PlaneInfo;
use crate::display::PlaneKind;
use crate::pattern;

const DRI_CARD_GLOB: &str = "/dev/dri/card*";

/// An opened DRM card node.
#[derive(Debug)]
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

impl Card {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Card(file))
    }

    pub fn driver_name(&self) -> Result<String> {
        let driver = self.get_driver().context("DRM_IOCTL_VERSION failed")?;
        Ok(driver.name().to_string_lossy().into_owned())
    }

    /// Device minor number, which also names the card's debugfs directory.
    pub fn minor(&self) -> Result<u32> {
        let meta = self.0.metadata()?;
        Ok(nix::sys::stat::minor(meta.rdev()) as u32)
    }
}

/// Open the first DRM card node driven by `driver`.
pub fn open_driver(driver: &str) -> Result<(Card, PathBuf)> {
    for entry in glob::glob(DRI_CARD_GLOB)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                debug!("skipping unreadable DRM node: {}", e);
                continue;
            }
        };
        let card = match Card::open(&path) {
            Ok(card) => card,
            Err(e) => {
                debug!("{:#}", e);
                continue;
            }
        };
        match card.driver_name() {
            Ok(name) if name == driver => return Ok((card, path)),
            Ok(name) => debug!("{}: driver {}, skipping", path.display(), name),
            Err(e) => debug!("{}: {:#}", path.display(), e),
        }
    }
    bail!("no DRM device driven by {} found", driver)
}

type PropertyHandles = HashMap<String, property::Handle>;

struct OutputEntry {
    handle: connector::Handle,
    info: connector::Info,
    pipes: Vec<PipeId>,
    mode: Option<drm::control::Mode>,
    props: PropertyHandles,
}

struct PlaneEntry {
    handle: plane::Handle,
    kind: PlaneKind,
    pipes: Vec<PipeId>,
    props: PropertyHandles,
}

struct BufferEntry {
    fb: framebuffer::Handle,
    db: DumbBuffer,
    width: u32,
    height: u32,
}

/// [`DisplayOps`] on top of a DRM/KMS device using atomic modesetting and
/// dumb buffers.
pub struct DrmDisplay {
    card: Card,
    atomic: bool,
    crtcs: Vec<crtc::Handle>,
    crtc_props: Vec<PropertyHandles>,
    outputs: Vec<OutputEntry>,
    planes: Vec<PlaneEntry>,
    binding: Option<(OutputId, PipeId)>,
    mode_blob: u64,
    staged: BTreeMap<PlaneId, BufferHandle>,
    buffers: BTreeMap<BufferHandle, BufferEntry>,
    next_buffer: u32,
}

impl DrmDisplay {
    pub fn new(card: Card) -> Result<Self> {
        card.set_client_capability(ClientCapability::UniversalPlanes, true)
            .context("failed to enable universal planes")?;
        let atomic = card
            .set_client_capability(ClientCapability::Atomic, true)
            .is_ok();

        let res = card
            .resource_handles()
            .context("failed to get DRM resources")?;
        let crtcs = res.crtcs().to_vec();
        let pipe_of = |handle: crtc::Handle| {
            crtcs
                .iter()
                .position(|&c| c == handle)
                .map(|idx| PipeId(idx as u32))
        };

        let mut crtc_props = Vec::with_capacity(crtcs.len());
        for &crtc in &crtcs {
            crtc_props.push(property_handles(&card, crtc)?);
        }

        let mut outputs = Vec::new();
        for &handle in res.connectors() {
            let info = card
                .get_connector(handle, true)
                .context("failed to probe connector")?;
            let mut pipes = Vec::new();
            for &encoder in info.encoders() {
                let encoder = card.get_encoder(encoder)?;
                for crtc in res.filter_crtcs(encoder.possible_crtcs()) {
                    if let Some(pipe) = pipe_of(crtc) {
                        if !pipes.contains(&pipe) {
                            pipes.push(pipe);
                        }
                    }
                }
            }
            pipes.sort();
            let mode = info
                .modes()
                .iter()
                .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
                .or_else(|| info.modes().first())
                .copied();
            let props = property_handles(&card, handle)?;
            outputs.push(OutputEntry {
                handle,
                info,
                pipes,
                mode,
                props,
            });
        }

        let mut planes = Vec::new();
        for handle in card.plane_handles().context("failed to list planes")? {
            let info = card.get_plane(handle)?;
            let pipes: Vec<PipeId> = res
                .filter_crtcs(info.possible_crtcs())
                .into_iter()
                .filter_map(pipe_of)
                .collect();
            let values = property_values(&card, handle)?;
            let kind = values
                .get("type")
                .and_then(|&(_, raw)| PlaneKind::from_raw(raw))
                .ok_or_else(|| anyhow!("plane {:?} has no usable type property", handle))?;
            let props = values
                .into_iter()
                .map(|(name, (prop, _))| (name, prop))
                .collect();
            planes.push(PlaneEntry {
                handle,
                kind,
                pipes,
                props,
            });
        }

        debug!(
            "DRM device: {} pipes, {} outputs, {} planes, atomic={}",
            crtcs.len(),
            outputs.len(),
            planes.len(),
            atomic
        );

        Ok(Self {
            card,
            atomic,
            crtcs,
            crtc_props,
            outputs,
            planes,
            binding: None,
            mode_blob: 0,
            staged: BTreeMap::new(),
            buffers: BTreeMap::new(),
            next_buffer: 1,
        })
    }

    pub fn card(&self) -> &Card {
        &self.card
    }

    fn output(&self, output: OutputId) -> Option<&OutputEntry> {
        self.outputs.get(output.0 as usize)
    }

    fn build_request(&self) -> io::Result<AtomicModeReq> {
        let (output, pipe) = self.binding.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no output bound to a pipe")
        })?;
        let out = &self.outputs[output.0 as usize];
        let crtc = self.crtcs[pipe.0 as usize];
        let crtc_props = &self.crtc_props[pipe.0 as usize];

        let mut req = AtomicModeReq::new();
        req.add_property(
            out.handle,
            prop(&out.props, "CRTC_ID")?,
            property::Value::CRTC(Some(crtc)),
        );
        req.add_property(
            crtc,
            prop(crtc_props, "MODE_ID")?,
            property::Value::Blob(self.mode_blob),
        );
        req.add_property(
            crtc,
            prop(crtc_props, "ACTIVE")?,
            property::Value::Boolean(true),
        );

        for (idx, plane) in self.planes.iter().enumerate() {
            if !plane.pipes.contains(&pipe) {
                continue;
            }
            let staged = self
                .staged
                .get(&PlaneId(idx as u32))
                .and_then(|buffer| self.buffers.get(buffer));
            let Some(buf) = staged else {
                req.add_property(
                    plane.handle,
                    prop(&plane.props, "FB_ID")?,
                    property::Value::Framebuffer(None),
                );
                req.add_property(
                    plane.handle,
                    prop(&plane.props, "CRTC_ID")?,
                    property::Value::CRTC(None),
                );
                continue;
            };

            let (w, h) = (buf.width as u64, buf.height as u64);
            let values = [
                ("FB_ID", property::Value::Framebuffer(Some(buf.fb))),
                ("CRTC_ID", property::Value::CRTC(Some(crtc))),
                // Source coordinates are 16.16 fixed point.
                ("SRC_X", property::Value::UnsignedRange(0)),
                ("SRC_Y", property::Value::UnsignedRange(0)),
                ("SRC_W", property::Value::UnsignedRange(w << 16)),
                ("SRC_H", property::Value::UnsignedRange(h << 16)),
                ("CRTC_X", property::Value::SignedRange(0)),
                ("CRTC_Y", property::Value::SignedRange(0)),
                ("CRTC_W", property::Value::UnsignedRange(w)),
                ("CRTC_H", property::Value::UnsignedRange(h)),
            ];
            for (name, value) in values {
                req.add_property(plane.handle, prop(&plane.props, name)?, value);
            }
        }

        Ok(req)
    }

    fn release_mode_blob(&mut self) {
        if self.mode_blob == 0 {
            return;
        }
        if let Err(e) = self.card.destroy_property_blob(self.mode_blob) {
            warn!("failed to destroy mode blob {}: {}", self.mode_blob, e);
        }
        self.mode_blob = 0;
    }

    fn destroy(&self, entry: BufferEntry) -> Result<()> {
        self.card
            .destroy_framebuffer(entry.fb)
            .context("failed to remove framebuffer")?;
        self.card
            .destroy_dumb_buffer(entry.db)
            .context("failed to destroy dumb buffer")?;
        Ok(())
    }
}

impl DisplayOps for DrmDisplay {
    fn is_atomic(&self) -> bool {
        self.atomic
    }

    fn pipes(&self) -> Vec<PipeId> {
        (0..self.crtcs.len() as u32).map(PipeId).collect()
    }

    fn outputs_for_pipe(&self, pipe: PipeId) -> Vec<OutputId> {
        self.outputs
            .iter()
            .enumerate()
            .filter(|(_, out)| out.pipes.contains(&pipe))
            .map(|(idx, _)| OutputId(idx as u32))
            .collect()
    }

    fn connector_state(&self, output: OutputId) -> ConnectorState {
        match self.output(output).map(|out| out.info.state()) {
            Some(connector::State::Connected) => ConnectorState::Connected,
            Some(connector::State::Disconnected) => ConnectorState::Disconnected,
            _ => ConnectorState::Unknown,
        }
    }

    fn connector_type_name(&self, output: OutputId) -> String {
        match self.output(output) {
            Some(out) => format!(
                "{}-{}",
                interface_name(out.info.interface()),
                out.info.interface_id()
            ),
            None => "Unknown".to_string(),
        }
    }

    fn bind_output(&mut self, output: OutputId, pipe: PipeId) -> Result<()> {
        let out = self
            .output(output)
            .ok_or_else(|| anyhow!("no output {:?}", output))?;
        if !out.pipes.contains(&pipe) {
            bail!("output {:?} can't be driven by pipe {}", output, pipe);
        }
        let mode = out
            .mode
            .ok_or_else(|| anyhow!("output {:?} reports no modes", output))?;

        let blob = self
            .card
            .create_property_blob(&mode)
            .context("failed to create mode blob")?;
        let property::Value::Blob(blob) = blob else {
            bail!("mode blob has unexpected property type");
        };

        self.release_mode_blob();
        self.mode_blob = blob;
        self.binding = Some((output, pipe));
        Ok(())
    }

    fn output_mode(&self, output: OutputId) -> Option<Mode> {
        let mode = self.output(output)?.mode?;
        let (width, height) = mode.size();
        Some(Mode::new(width as u32, height as u32, mode.vrefresh()))
    }

    fn planes(&self, pipe: PipeId) -> Vec<PlaneInfo> {
        let rank = |kind: PlaneKind| match kind {
            PlaneKind::Primary => 0,
            PlaneKind::Overlay => 1,
            PlaneKind::Cursor => 2,
        };
        let mut planes: Vec<PlaneInfo> = self
            .planes
            .iter()
            .enumerate()
            .filter(|(_, plane)| plane.pipes.contains(&pipe))
            .map(|(idx, plane)| PlaneInfo {
                id: PlaneId(idx as u32),
                kind: plane.kind,
            })
            .collect();
        // Stable sort keeps enumeration order within a kind.
        planes.sort_by_key(|plane| rank(plane.kind));
        planes
    }

    fn create_pattern_buffer(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<BufferHandle> {
        let fourcc = match format {
            PixelFormat::Xrgb8888 => DrmFourcc::Xrgb8888,
        };
        let mut db = self
            .card
            .create_dumb_buffer((width, height), fourcc, format.bpp())
            .with_context(|| format!("failed to create {}x{} dumb buffer", width, height))?;
        let pitch = db.pitch();

        let filled = self
            .card
            .map_dumb_buffer(&mut db)
            .map(|mut mapping| pattern::fill_xrgb8888(mapping.as_mut(), width, height, pitch));
        if let Err(e) = filled {
            if let Err(e) = self.card.destroy_dumb_buffer(db) {
                warn!("failed to destroy unmappable dumb buffer: {}", e);
            }
            return Err(e).context("failed to map dumb buffer");
        }

        let fb = match self.card.add_framebuffer(&db, format.depth(), format.bpp()) {
            Ok(fb) => fb,
            Err(e) => {
                if let Err(e) = self.card.destroy_dumb_buffer(db) {
                    warn!("failed to destroy dumb buffer: {}", e);
                }
                return Err(e).context("failed to add framebuffer");
            }
        };

        let handle = BufferHandle(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            handle,
            BufferEntry {
                fb,
                db,
                width,
                height,
            },
        );
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        let entry = self
            .buffers
            .remove(&buffer)
            .ok_or_else(|| anyhow!("unknown buffer {:?}", buffer))?;
        self.staged.retain(|_, staged| *staged != buffer);
        self.destroy(entry)
    }

    fn set_plane_buffer(&mut self, plane: PlaneId, buffer: Option<BufferHandle>) -> Result<()> {
        if plane.0 as usize >= self.planes.len() {
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
        let req = self.build_request()?;
        self.card
            .atomic_commit(AtomicCommitFlags::ALLOW_MODESET, req)
            .map_err(to_io_error)
    }

    fn commit(&mut self) -> Result<()> {
        let req = self.build_request()?;
        self.card
            .atomic_commit(AtomicCommitFlags::ALLOW_MODESET, req)
            .context("atomic commit failed")
    }

    fn wait_for_vblank(&mut self, pipe: PipeId) -> Result<()> {
        self.card
            .wait_vblank(VblankWaitTarget::Relative(1), VblankWaitFlags::empty(), pipe.0, 0)
            .with_context(|| format!("failed to wait for vblank on pipe {}", pipe))?;
        Ok(())
    }
}

impl Drop for DrmDisplay {
    fn drop(&mut self) {
        self.staged.clear();
        let buffers = std::mem::take(&mut self.buffers);
        for (handle, entry) in buffers {
            if let Err(e) = self.destroy(entry) {
                warn!("failed to release buffer {:?}: {:#}", handle, e);
            }
        }
        self.release_mode_blob();
    }
}

/// Recover the errno behind a DRM ioctl failure.
///
/// `SystemError` folds a few errnos into named variants, everything else
/// (ENOSPC included) stays in `Unknown`.
fn to_io_error(err: SystemError) -> io::Error {
    let errno = match &err {
        SystemError::InvalidFileDescriptor => libc::EBADF,
        SystemError::MemoryFault => libc::EFAULT,
        SystemError::InvalidArgument => libc::EINVAL,
        SystemError::InvalidFileType => libc::ENOTTY,
        SystemError::PermissionDenied => libc::EACCES,
        SystemError::UnknownFourcc => {
            return io::Error::new(io::ErrorKind::InvalidData, err.to_string())
        }
        SystemError::Unknown { errno } => *errno as i32,
    };
    io::Error::from_raw_os_error(errno)
}

fn prop(props: &PropertyHandles, name: &str) -> io::Result<property::Handle> {
    props.get(name).copied().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("missing KMS property {}", name),
        )
    })
}

fn property_values<H: ResourceHandle>(
    card: &Card,
    handle: H,
) -> Result<HashMap<String, (property::Handle, property::RawValue)>> {
    let props = card
        .get_properties(handle)
        .context("failed to get object properties")?;
    let (ids, values) = props.as_props_and_values();
    let mut map = HashMap::new();
    for (&id, &value) in ids.iter().zip(values) {
        let info = card.get_property(id)?;
        map.insert(info.name().to_string_lossy().into_owned(), (id, value));
    }
    Ok(map)
}

fn property_handles<H: ResourceHandle>(card: &Card, handle: H) -> Result<PropertyHandles> {
    Ok(property_values(card, handle)?
        .into_iter()
        .map(|(name, (id, _))| (name, id))
        .collect())
}

fn interface_name(interface: connector::Interface) -> String {
    match interface {
        connector::Interface::HDMIA => "HDMI-A".to_string(),
        connector::Interface::HDMIB => "HDMI-B".to_string(),
        connector::Interface::DisplayPort => "DP".to_string(),
        connector::Interface::EmbeddedDisplayPort => "eDP".to_string(),
        connector::Interface::Composite => "Composite".to_string(),
        connector::Interface::VGA => "VGA".to_string(),
        connector::Interface::DSI => "DSI".to_string(),
        connector::Interface::DPI => "DPI".to_string(),
        other => format!("{:?}", other),
    }
}
