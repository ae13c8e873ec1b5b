//! Binary frame encoding: the inverse of the engine's "RFDR" decoder, so
//! simulated runs feed real bytes through the real ingress path.

use byteorder::{LittleEndian, WriteBytesExt};
use radar_core::decode::{FRAME_MAGIC, FRAME_VERSION};

/// One simulated radar return, in the sensor's spherical frame.
#[derive(Clone, Debug)]
pub struct SimReturn {
    pub range: f64,
    pub azimuth: f64,
    pub elevation: f64,
    pub velocity: [f64; 3],
    pub snr: f32,
    pub rcs: f32,
    pub beam_id: u32,
}

/// Encode one frame of returns into the wire format.
pub fn encode_frame(seq: u64, returns: &[SimReturn]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + returns.len() * 64);
    // Writes into a Vec cannot fail.
    buf.write_u32::<LittleEndian>(FRAME_MAGIC).unwrap();
    buf.write_u16::<LittleEndian>(FRAME_VERSION).unwrap();
    buf.write_u16::<LittleEndian>(returns.len() as u16).unwrap();
    buf.write_u64::<LittleEndian>(seq).unwrap();
    for r in returns {
        buf.write_f64::<LittleEndian>(r.range).unwrap();
        buf.write_f64::<LittleEndian>(r.azimuth).unwrap();
        buf.write_f64::<LittleEndian>(r.elevation).unwrap();
        for v in r.velocity {
            buf.write_f64::<LittleEndian>(v).unwrap();
        }
        buf.write_f32::<LittleEndian>(r.snr).unwrap();
        buf.write_f32::<LittleEndian>(r.rcs).unwrap();
        buf.write_u32::<LittleEndian>(r.beam_id).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap(); // flags
    }
    buf
}
