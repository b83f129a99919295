//! Gzip-framed flow codec: reads and writes the on-disk flow format.
//!
//! Version is carried in the gzip header itself rather than the inflated
//! body: the flag byte's `FLG.FCOMMENT` bit (mask `0x16`) distinguishes
//! the current (v6) record layout from the legacy v4 one.

use crate::error::{HapError, Result};
use crate::flow::{FlowRecord, FlowRecordV4, FLOW_RECORD_V4_SIZE, FLOW_RECORD_V6_SIZE};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

const GZIP_ID1: u8 = 0x1F;
const GZIP_ID2: u8 = 0x8B;
const GZIP_CM_DEFLATE: u8 = 0x08;
/// Bit mask isolating `FLG.FCOMMENT` within the gzip flag byte, reused to
/// signal the v6 record version.
const FLG_FCOMMENT_MASK: u8 = 0x16;

const V6_COMMENT: &str = "CFLOW: cflow6";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordVersion {
    V4,
    V6,
}

fn detect_version(header: &[u8; 10]) -> Result<RecordVersion> {
    if header[0] != GZIP_ID1 || header[1] != GZIP_ID2 || header[2] != GZIP_CM_DEFLATE {
        return Err(HapError::BadGzipMagic {
            file: String::new(),
        });
    }
    let flg = header[3];
    if flg & FLG_FCOMMENT_MASK != 0 {
        Ok(RecordVersion::V6)
    } else {
        Ok(RecordVersion::V4)
    }
}

/// Reads every flow record out of a gzip-compressed flow file.
///
/// Clears the `UNIBIFLOW` qualifier on every record: that bit is re-derived
/// by [`crate::loader`], never persisted.
pub fn read_flows(path: &Path) -> Result<Vec<FlowRecord>> {
    let file_name = path.display().to_string();
    let raw = std::fs::read(path)?;
    if raw.is_empty() {
        return Err(HapError::EmptyInput { file: file_name });
    }
    if raw.len() < 10 {
        return Err(HapError::BadGzipMagic { file: file_name });
    }
    let mut header = [0u8; 10];
    header.copy_from_slice(&raw[0..10]);
    let version = detect_version(&header).map_err(|e| with_file(e, &file_name))?;

    let mut decoder = GzDecoder::new(raw.as_slice());
    let mut body = Vec::new();
    decoder
        .read_to_end(&mut body)
        .map_err(|e| HapError::FormatCorrupted {
            file: file_name.clone(),
            detail: e.to_string(),
        })?;

    if body.is_empty() {
        return Err(HapError::EmptyInput { file: file_name });
    }

    let record_size = match version {
        RecordVersion::V4 => FLOW_RECORD_V4_SIZE,
        RecordVersion::V6 => FLOW_RECORD_V6_SIZE,
    };
    if body.len() % record_size != 0 {
        return Err(HapError::SizeNotMultiple {
            file: file_name,
            size: body.len() as u64,
            record_size,
        });
    }

    let mut flows = Vec::with_capacity(body.len() / record_size);
    for (i, chunk) in body.chunks_exact(record_size).enumerate() {
        let mut flow = match version {
            RecordVersion::V4 => {
                let mut buf = [0u8; FLOW_RECORD_V4_SIZE];
                buf.copy_from_slice(chunk);
                FlowRecordV4::from_le_bytes(&buf).up_promote()
            }
            RecordVersion::V6 => {
                let mut buf = [0u8; FLOW_RECORD_V6_SIZE];
                buf.copy_from_slice(chunk);
                let flow = FlowRecord::from_le_bytes(&buf);
                if flow.magic != crate::flow::CFLOW_CURRENT_MAGIC_NUMBER
                    && flow.magic != crate::flow::CFLOW_4_MAGIC_NUMBER
                {
                    return Err(HapError::BadRecordMagic {
                        file: file_name,
                        offset: (i * record_size) as u64,
                        magic: flow.magic,
                    });
                }
                flow
            }
        };
        flow.flowtype.clear(crate::flow::FlowType::UNIBIFLOW);
        flows.push(flow);
    }

    Ok(flows)
}

fn with_file(err: HapError, file: &str) -> HapError {
    match err {
        HapError::BadGzipMagic { .. } => HapError::BadGzipMagic {
            file: file.to_string(),
        },
        other => other,
    }
}

/// Writes `flows` to `path` in the current (v6) wire format, tagging the
/// gzip member with the `CFLOW: cflow6` comment the reader's version probe
/// relies on.
pub fn write_flows(path: &Path, flows: &[FlowRecord]) -> Result<()> {
    let file = File::create(path)?;
    let mut encoder = GzBuilder::new()
        .comment(V6_COMMENT)
        .write(file, Compression::default());
    for flow in flows {
        encoder.write_all(&flow.to_le_bytes())?;
    }
    encoder.finish()?;
    Ok(())
}

/// Appends `new_flows` to the flow file at `path`, creating it if absent.
///
/// Append is not a streaming operation: the entire
/// existing file is loaded, merged with `new_flows`, sorted by
/// `(localIP, remoteIP, startMs)`, and rewritten to a temporary file that
/// is renamed over the original only once the new sink has been written
/// successfully in full.
pub fn append_flows(path: &Path, new_flows: &[FlowRecord]) -> Result<()> {
    let mut merged = if path.exists() {
        read_flows(path)?
    } else {
        Vec::new()
    };
    merged.extend_from_slice(new_flows);
    merged.sort_by_key(FlowRecord::sort_key);

    let tmp_path = path.with_extension("tmp");
    write_flows(&tmp_path, &merged)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Convenience wrapper around [`GzEncoder`] for tests that need a raw
/// encoder without the comment-tag plumbing `write_flows` adds.
#[cfg(test)]
fn gzip_bytes(body: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).unwrap();
    encoder.finish().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{well_known_protocol, FlowType};
    use crate::ip_addr::IpAddr;
    use tempfile_shim::TempPath;

    /// Minimal scratch-file helper so tests don't need an extra `tempfile`
    /// dev dependency.
    mod tempfile_shim {
        use std::path::{Path, PathBuf};

        pub struct TempPath(PathBuf);

        impl TempPath {
            pub fn new(name: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("hap_graphlet_test_{}_{}", std::process::id(), name));
                TempPath(path)
            }
        }

        impl AsRef<Path> for TempPath {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
                let _ = std::fs::remove_file(self.0.with_extension("tmp"));
            }
        }
    }

    fn sample_flow(local_port: u16) -> FlowRecord {
        FlowRecord::new(
            IpAddr::from_ipv4_octets([10, 0, 0, 1]),
            local_port,
            IpAddr::from_ipv4_octets([93, 184, 216, 34]),
            443,
            well_known_protocol::TCP,
            FlowType::new(FlowType::BIFLOW),
            1_700_000_000_000,
            500,
            2048,
            4,
        )
    }

    #[test]
    fn round_trips_v6_flows_through_gzip() {
        let path = TempPath::new("roundtrip");
        let flows = vec![sample_flow(1000), sample_flow(1001)];
        write_flows(path.as_ref(), &flows).unwrap();
        let read_back = read_flows(path.as_ref()).unwrap();
        assert_eq!(read_back, flows);
    }

    #[test]
    fn empty_file_is_rejected() {
        let path = TempPath::new("empty");
        std::fs::write(path.as_ref(), []).unwrap();
        let err = read_flows(path.as_ref()).unwrap_err();
        assert!(matches!(err, HapError::EmptyInput { .. }));
    }

    #[test]
    fn non_gzip_input_is_rejected() {
        let path = TempPath::new("notgzip");
        std::fs::write(path.as_ref(), b"not a gzip file at all").unwrap();
        let err = read_flows(path.as_ref()).unwrap_err();
        assert!(matches!(err, HapError::BadGzipMagic { .. }));
    }

    #[test]
    fn size_not_a_record_multiple_is_rejected() {
        let path = TempPath::new("badsize");
        let body = gzip_bytes(&[0u8; FLOW_RECORD_V6_SIZE + 1]);
        std::fs::write(path.as_ref(), body).unwrap();
        let err = read_flows(path.as_ref()).unwrap_err();
        assert!(matches!(err, HapError::SizeNotMultiple { .. }));
    }

    #[test]
    fn unibiflow_bit_is_cleared_on_load() {
        let path = TempPath::new("unibiflow");
        let mut flow = sample_flow(2000);
        flow.flowtype.set(FlowType::UNIBIFLOW);
        write_flows(path.as_ref(), &[flow]).unwrap();
        let read_back = read_flows(path.as_ref()).unwrap();
        assert!(!read_back[0].flowtype.is_unibiflow_qualified());
    }

    #[test]
    fn append_merges_sorts_and_rewrites_atomically() {
        let path = TempPath::new("append");
        let first = sample_flow(10);
        write_flows(path.as_ref(), &[first]).unwrap();

        let mut second = sample_flow(20);
        second.local_ip = IpAddr::from_ipv4_octets([9, 0, 0, 1]);
        append_flows(path.as_ref(), &[second]).unwrap();

        let merged = read_flows(path.as_ref()).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged[0].local_ip < merged[1].local_ip);
    }
}
