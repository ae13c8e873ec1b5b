//! Raw sensor frame decoder.
//!
//! Parses one opaque byte buffer per sensor frame into detection records.
//! Pure function of the input bytes plus the decoder's counters; no I/O.
//!
//! # "RFDR" binary frame format (little-endian)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     Magic: 0x52444652 ("RFDR")
//! 4       2     Format version (= 1)
//! 6       2     Detection count
//! 8       8     Frame sequence number
//! 16      n*64  Detection records
//! ```
//!
//! Each 64-byte record: range f64, azimuth f64, elevation f64, velocity
//! f64 x3, SNR f32, RCS f32, beam id u32, flags u32 (reserved).
//!
//! On malformed input the decoder emits the valid prefix and records a
//! recoverable error; it never aborts the pipeline. Records carrying
//! non-finite or out-of-range fields invalidate only themselves.

use crate::error::RadarError;
use crate::math::spherical_to_cartesian;
use crate::types::{Detection, DetectionId, FrameDetections, RawFrame};
use byteorder::{LittleEndian, ReadBytesExt};
use std::f64::consts::{FRAC_PI_2, PI};
use std::io::Cursor;

/// Frame magic ("RFDR" in LE byte order).
pub const FRAME_MAGIC: u32 = 0x5244_4652;

/// Supported format version.
pub const FRAME_VERSION: u16 = 1;

/// Header size in bytes (before detection records).
pub const HEADER_SIZE: usize = 16;

/// Size of one detection record in bytes.
pub const RECORD_SIZE: usize = 64;

/// Result of decoding one frame: the valid prefix plus an optional
/// recoverable error describing where parsing stopped.
#[derive(Debug)]
pub struct DecodeOutcome {
    pub frame: FrameDetections,
    pub error: Option<RadarError>,
    /// Records dropped for out-of-range or non-finite fields
    pub rejected_records: usize,
}

/// Stateful frame decoder. Owns the detection-id counter and enforces
/// per-frame timestamp monotonicity.
pub struct FrameDecoder {
    next_detection_id: u64,
    last_seq: Option<u64>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            next_detection_id: 0,
            last_seq: None,
        }
    }

    /// Decode one raw frame. Detections are stamped with the frame's
    /// arrival time.
    pub fn decode(&mut self, raw: &RawFrame) -> DecodeOutcome {
        let data = &raw.bytes;
        let mut frame = FrameDetections {
            seq: 0,
            arrival_ns: raw.arrival_ns,
            detections: Vec::new(),
        };

        if data.len() < HEADER_SIZE {
            return DecodeOutcome {
                frame,
                error: Some(RadarError::DecodeMalformed {
                    offset: data.len(),
                    reason: format!("truncated header ({} of {HEADER_SIZE} bytes)", data.len()),
                }),
                rejected_records: 0,
            };
        }

        let mut cursor = Cursor::new(data.as_slice());
        // Header reads cannot fail past the length check above.
        let magic = cursor.read_u32::<LittleEndian>().unwrap_or(0);
        if magic != FRAME_MAGIC {
            return DecodeOutcome {
                frame,
                error: Some(RadarError::DecodeMalformed {
                    offset: 0,
                    reason: format!("bad magic {magic:#010x}"),
                }),
                rejected_records: 0,
            };
        }
        let version = cursor.read_u16::<LittleEndian>().unwrap_or(0);
        if version != FRAME_VERSION {
            return DecodeOutcome {
                frame,
                error: Some(RadarError::DecodeMalformed {
                    offset: 4,
                    reason: format!("unsupported version {version}"),
                }),
                rejected_records: 0,
            };
        }
        let count = cursor.read_u16::<LittleEndian>().unwrap_or(0) as usize;
        let seq = cursor.read_u64::<LittleEndian>().unwrap_or(0);
        frame.seq = seq;

        if let Some(last) = self.last_seq {
            if seq <= last {
                tracing::debug!(seq, last, "out-of-order frame sequence");
            }
        }
        self.last_seq = Some(seq);

        let mut error = None;
        let mut rejected = 0usize;
        frame.detections.reserve(count);

        for i in 0..count {
            let offset = HEADER_SIZE + i * RECORD_SIZE;
            if data.len() < offset + RECORD_SIZE {
                // Truncated tail: keep the valid prefix.
                error = Some(RadarError::DecodeMalformed {
                    offset,
                    reason: format!(
                        "truncated record {i} of {count} ({} of {} bytes)",
                        data.len() - offset,
                        RECORD_SIZE
                    ),
                });
                break;
            }
            match Self::read_record(&mut cursor) {
                Some(rec) if Self::record_in_range(&rec) => {
                    let position = spherical_to_cartesian(rec.range, rec.azimuth, rec.elevation);
                    let id = DetectionId(self.next_detection_id);
                    self.next_detection_id += 1;
                    frame.detections.push(Detection {
                        id,
                        position,
                        velocity: rec.velocity,
                        range: rec.range,
                        azimuth: rec.azimuth,
                        elevation: rec.elevation,
                        snr: rec.snr,
                        rcs: rec.rcs,
                        beam_id: rec.beam_id,
                        timestamp_ns: raw.arrival_ns,
                    });
                }
                _ => rejected += 1,
            }
        }

        DecodeOutcome {
            frame,
            error,
            rejected_records: rejected,
        }
    }

    fn read_record(cursor: &mut Cursor<&[u8]>) -> Option<RawRecord> {
        let range = cursor.read_f64::<LittleEndian>().ok()?;
        let azimuth = cursor.read_f64::<LittleEndian>().ok()?;
        let elevation = cursor.read_f64::<LittleEndian>().ok()?;
        let vx = cursor.read_f64::<LittleEndian>().ok()?;
        let vy = cursor.read_f64::<LittleEndian>().ok()?;
        let vz = cursor.read_f64::<LittleEndian>().ok()?;
        let snr = cursor.read_f32::<LittleEndian>().ok()? as f64;
        let rcs = cursor.read_f32::<LittleEndian>().ok()? as f64;
        let beam_id = cursor.read_u32::<LittleEndian>().ok()?;
        let _flags = cursor.read_u32::<LittleEndian>().ok()?;
        Some(RawRecord {
            range,
            azimuth,
            elevation,
            velocity: crate::types::Vec3::new(vx, vy, vz),
            snr,
            rcs,
            beam_id,
        })
    }

    fn record_in_range(rec: &RawRecord) -> bool {
        rec.range.is_finite()
            && rec.range >= 0.0
            && rec.azimuth.is_finite()
            && (-PI..=PI).contains(&rec.azimuth)
            && rec.elevation.is_finite()
            && (-FRAC_PI_2..=FRAC_PI_2).contains(&rec.elevation)
            && rec.velocity.iter().all(|v| v.is_finite())
            && rec.snr.is_finite()
            && rec.rcs.is_finite()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

struct RawRecord {
    range: f64,
    azimuth: f64,
    elevation: f64,
    velocity: crate::types::Vec3,
    snr: f64,
    rcs: f64,
    beam_id: u32,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn push_record(
        buf: &mut Vec<u8>,
        range: f64,
        azimuth: f64,
        elevation: f64,
        vel: [f64; 3],
        snr: f32,
    ) {
        buf.extend_from_slice(&range.to_le_bytes());
        buf.extend_from_slice(&azimuth.to_le_bytes());
        buf.extend_from_slice(&elevation.to_le_bytes());
        for v in vel {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&snr.to_le_bytes());
        buf.extend_from_slice(&12.5f32.to_le_bytes()); // rcs
        buf.extend_from_slice(&3u32.to_le_bytes()); // beam
        buf.extend_from_slice(&0u32.to_le_bytes()); // flags
    }

    fn frame_bytes(seq: u64, records: &[(f64, f64, f64)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf.extend_from_slice(&FRAME_VERSION.to_le_bytes());
        buf.extend_from_slice(&(records.len() as u16).to_le_bytes());
        buf.extend_from_slice(&seq.to_le_bytes());
        for &(r, az, el) in records {
            push_record(&mut buf, r, az, el, [10.0, 0.0, 0.0], 20.0);
        }
        buf
    }

    #[test]
    fn decodes_well_formed_frame() {
        let bytes = frame_bytes(7, &[(10_000.0, 0.5, 0.1), (20_000.0, -1.0, 0.0)]);
        let mut dec = FrameDecoder::new();
        let out = dec.decode(&RawFrame {
            arrival_ns: 42,
            bytes,
        });
        assert!(out.error.is_none());
        assert_eq!(out.frame.seq, 7);
        assert_eq!(out.frame.detections.len(), 2);
        assert_eq!(out.frame.detections[0].timestamp_ns, 42);
        assert_eq!(out.frame.detections[0].beam_id, 3);
        // position consistent with the spherical fields
        let d = &out.frame.detections[0];
        let p = spherical_to_cartesian(d.range, d.azimuth, d.elevation);
        assert!((d.position - p).norm() < 1e-9);
    }

    #[test]
    fn detection_ids_are_unique_across_frames() {
        let mut dec = FrameDecoder::new();
        let mut seen = std::collections::HashSet::new();
        for seq in 0..5u64 {
            let bytes = frame_bytes(seq, &[(1000.0, 0.0, 0.0), (2000.0, 0.1, 0.0)]);
            let out = dec.decode(&RawFrame {
                arrival_ns: seq as i64,
                bytes,
            });
            for d in &out.frame.detections {
                assert!(seen.insert(d.id), "duplicate {}", d.id);
            }
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn truncated_tail_keeps_valid_prefix() {
        let mut bytes = frame_bytes(1, &[(1000.0, 0.0, 0.0), (2000.0, 0.1, 0.0)]);
        bytes.truncate(HEADER_SIZE + RECORD_SIZE + 10); // second record cut short
        let mut dec = FrameDecoder::new();
        let out = dec.decode(&RawFrame {
            arrival_ns: 0,
            bytes,
        });
        assert_eq!(out.frame.detections.len(), 1);
        assert!(matches!(
            out.error,
            Some(RadarError::DecodeMalformed { .. })
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = frame_bytes(1, &[(1000.0, 0.0, 0.0)]);
        bytes[0] = 0xFF;
        let mut dec = FrameDecoder::new();
        let out = dec.decode(&RawFrame {
            arrival_ns: 0,
            bytes,
        });
        assert!(out.frame.detections.is_empty());
        assert!(out.error.is_some());
    }

    #[test]
    fn out_of_range_record_dropped_not_fatal() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf.extend_from_slice(&FRAME_VERSION.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&9u64.to_le_bytes());
        push_record(&mut buf, -5.0, 0.0, 0.0, [0.0; 3], 15.0); // negative range
        push_record(&mut buf, 500.0, 0.2, 0.0, [0.0; 3], 15.0);
        let mut dec = FrameDecoder::new();
        let out = dec.decode(&RawFrame {
            arrival_ns: 0,
            bytes: buf,
        });
        assert!(out.error.is_none());
        assert_eq!(out.rejected_records, 1);
        assert_eq!(out.frame.detections.len(), 1);
        assert_eq!(out.frame.detections[0].range, 500.0);
    }

    #[test]
    fn empty_input_is_malformed() {
        let mut dec = FrameDecoder::new();
        let out = dec.decode(&RawFrame {
            arrival_ns: 0,
            bytes: vec![],
        });
        assert!(out.error.is_some());
        assert!(out.frame.detections.is_empty());
    }
}
