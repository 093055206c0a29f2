use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;
use tracing::warn;

const PCAP_MAGIC: u32 = 0xa1b2c3d4;
const SNAPLEN: u32 = 65535;
const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

/// libpcap (not pcapng) writer for frames selected by the CLI, native byte
/// order as announced by the magic number.
pub struct PcapWriter<W: Write> {
    writer: W,
    frames: u64,
}

impl PcapWriter<BufWriter<File>> {
    /// Create `path` for writing. An existing file is never overwritten.
    pub fn create(path: &Path, link_type: u32) -> Result<Self> {
        let file = File::create_new(path).context(format!(
            "Refusing to write {}: file exists or cannot be created",
            path.display()
        ))?;
        PcapWriter::new(BufWriter::new(file), link_type)
    }
}

impl<W: Write> PcapWriter<W> {
    pub fn new(mut writer: W, link_type: u32) -> Result<Self> {
        writer.write_all(&global_header(link_type))?;
        Ok(PcapWriter { writer, frames: 0 })
    }

    pub fn write_packet(&mut self, data: &[u8], timestamp: SystemTime) -> Result<()> {
        // Pre-epoch timestamps are written as 0; ts_sec wraps in 2106.
        let since_epoch = timestamp.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);

        // One buffer per record so an I/O error never leaves half a header.
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + data.len());
        for field in [since_epoch.as_secs() as u32, since_epoch.subsec_micros(), len, len] {
            record.extend_from_slice(&field.to_ne_bytes());
        }
        record.extend_from_slice(data);
        self.writer.write_all(&record)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl<W: Write> Drop for PcapWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("failed to flush pcap output on close: {}", e);
        }
    }
}

fn global_header(link_type: u32) -> [u8; GLOBAL_HEADER_LEN] {
    let mut header = [0u8; GLOBAL_HEADER_LEN];
    header[0..4].copy_from_slice(&PCAP_MAGIC.to_ne_bytes());
    header[4..6].copy_from_slice(&2u16.to_ne_bytes());
    header[6..8].copy_from_slice(&4u16.to_ne_bytes());
    // thiszone and sigfigs stay zero
    header[16..20].copy_from_slice(&SNAPLEN.to_ne_bytes());
    header[20..24].copy_from_slice(&link_type.to_ne_bytes());
    header
}
