pub mod pcap_writer;

use anyhow::{Context, Result};
use pcap::{Activated, Capture, Device};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::protocol::LinkType;

/// One captured frame. Frame numbers start at 1, as in capture viewers.
pub struct CapturedFrame<'a> {
    pub frame: u32,
    pub data: &'a [u8],
    pub timestamp: SystemTime,
}

/// An owned frame, kept in memory for the replay pass.
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub frame: u32,
    pub data: Vec<u8>,
    pub timestamp: SystemTime,
}

/// Settings for capturing from an interface.
#[derive(Debug, Clone)]
pub struct LiveOptions<'a> {
    /// Default device when `None`.
    pub interface: Option<&'a str>,
    pub snaplen: i32,
    pub promisc: bool,
}

/// A pcap handle plus the link type its frames are parsed with.
pub struct FrameSource {
    capture: Capture<dyn Activated>,
    link_type: LinkType,
    next_frame: u32,
}

impl FrameSource {
    pub fn live(options: &LiveOptions<'_>, bpf: Option<&str>) -> Result<Self> {
        let device = match options.interface {
            Some(name) => Device::list()?
                .into_iter()
                .find(|d| d.name == name)
                .context(format!("Interface '{}' not found", name))?,
            None => Device::lookup()?.context("No capture device found")?,
        };
        debug!(device = %device.name, "opening live capture");

        let capture = Capture::from_device(device)?
            .snaplen(options.snaplen)
            .promisc(options.promisc)
            .timeout(1000)
            .open()
            .context("Failed to open capture device")?;
        FrameSource::activated(capture.into(), bpf)
    }

    pub fn from_file(path: &Path, bpf: Option<&str>) -> Result<Self> {
        let capture = Capture::from_file(path).context(format!("Failed to open pcap file: {}", path.display()))?;
        FrameSource::activated(capture.into(), bpf)
    }

    fn activated(mut capture: Capture<dyn Activated>, bpf: Option<&str>) -> Result<Self> {
        if let Some(filter) = bpf {
            capture
                .filter(filter, true)
                .context(format!("Invalid BPF filter: {}", filter))?;
        }
        let link_type = link_type_from_pcap(capture.get_datalink());
        Ok(FrameSource {
            capture,
            link_type,
            next_frame: 1,
        })
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    /// Feed frames to `f` in capture order until the source runs dry or `f`
    /// returns false. Read timeouts on live captures are not errors.
    pub fn for_each_frame<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(CapturedFrame) -> bool,
    {
        loop {
            let packet = match self.capture.next_packet() {
                Ok(packet) => packet,
                Err(pcap::Error::NoMorePackets) => return Ok(()),
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => return Err(e.into()),
            };
            let frame = self.next_frame;
            self.next_frame = self.next_frame.saturating_add(1);

            let captured = CapturedFrame {
                frame,
                data: packet.data,
                timestamp: frame_timestamp(packet.header.ts.tv_sec as i64, packet.header.ts.tv_usec as i64),
            };
            if !f(captured) {
                return Ok(());
            }
        }
    }

    /// Read every remaining frame into memory.
    pub fn collect_frames(&mut self) -> Result<Vec<StoredFrame>> {
        let mut frames = Vec::new();
        self.for_each_frame(|captured| {
            frames.push(StoredFrame {
                frame: captured.frame,
                data: captured.data.to_vec(),
                timestamp: captured.timestamp,
            });
            true
        })?;
        Ok(frames)
    }
}

/// Negative seconds and out-of-range microseconds from damaged files are
/// clamped rather than rejected.
fn frame_timestamp(secs: i64, usecs: i64) -> SystemTime {
    let secs = secs.max(0) as u64;
    let usecs = usecs.clamp(0, 999_999) as u32;
    UNIX_EPOCH + Duration::new(secs, usecs * 1000)
}

fn link_type_from_pcap(dl: pcap::Linktype) -> LinkType {
    match dl.0 {
        1 => LinkType::Ethernet,
        12 | 101 => LinkType::RawIp,
        105 => LinkType::Ieee80211,
        113 => LinkType::LinuxSll,
        127 => LinkType::Radiotap,
        _ => {
            warn!(
                "unsupported link type {} ({}), assuming Ethernet",
                dl.get_name().unwrap_or_default(),
                dl.0
            );
            LinkType::Ethernet
        }
    }
}
