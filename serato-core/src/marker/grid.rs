//! "Serato BeatGrid" field
//!
//! ```text
//! 01 00 | count (4) | entries | footer (1)
//! entry: position f32 | beats-to-next u32   (all but the last)
//!        position f32 | bpm f32             (last)
//! ```
//! Every value is big-endian.

use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use super::GridMarker;
use crate::error::{Error, Result};

pub const BEAT_GRID_VERSION: [u8; 2] = [0x01, 0x00];

/// Largest distance from an integer that still counts as a whole beat
pub const BEAT_SNAP_TOLERANCE: f32 = 0.005;

/// Beats between two grid markers must be a multiple of this
pub const BEATS_PER_BAR: u32 = 4;

#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy, PartialEq)]
struct GridHeader {
    version: [u8; 2],
    count: u32,
}

/// One grid entry; `value` is either a beat count or a BPM
#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy, PartialEq)]
struct GridEntry {
    position: f32,
    value: [u8; 4],
}

/// Decode the entry list into markers with a BPM each
pub fn decode_grid_markers(data: &[u8]) -> Result<Vec<GridMarker>> {
    let mut cursor = Cursor::new(data);
    let header = GridHeader::read(&mut cursor)?;
    if header.version != BEAT_GRID_VERSION {
        return Err(Error::MarkerFormat(format!(
            "unsupported BeatGrid version {:02X?}",
            header.version
        )));
    }

    let count = header.count as usize;
    if data.len() < 6 + count.saturating_mul(8) {
        return Err(Error::MarkerFormat(format!(
            "BeatGrid field too short for {} markers",
            count
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(GridEntry::read(&mut cursor)?);
    }

    let mut markers = Vec::with_capacity(count);
    for (i, entry) in entries.iter().enumerate() {
        let bpm = match entries.get(i + 1) {
            Some(next) => {
                let beats = u32::from_be_bytes(entry.value) as f32;
                let span = next.position - entry.position;
                if span <= 0.0 {
                    return Err(Error::MarkerFormat(format!(
                        "grid marker at {}s is not before the next one",
                        entry.position
                    )));
                }
                beats * 60.0 / span
            }
            None => f32::from_be_bytes(entry.value),
        };
        markers.push(GridMarker::new(entry.position, bpm));
    }

    Ok(markers)
}

/// Encode markers, sorting them and snapping every non-final BPM to the
/// whole number of beats it implies. `markers` is left holding exactly what
/// the encoded bytes decode to.
pub fn encode_grid_markers(markers: &mut Vec<GridMarker>) -> Result<Vec<u8>> {
    if let Some(bad) = markers
        .iter()
        .find(|m| !m.position_secs.is_finite() || !m.bpm.is_finite())
    {
        return Err(Error::MarkerFormat(format!(
            "grid marker at {}s with {} BPM is not finite",
            bad.position_secs, bad.bpm
        )));
    }
    markers.sort_by(|a, b| a.position_secs.total_cmp(&b.position_secs));

    let mut entries = Vec::with_capacity(markers.len());
    for (i, marker) in markers.iter().enumerate() {
        let value = match markers.get(i + 1) {
            Some(next) => beats_between(marker, next)?.to_be_bytes(),
            None => marker.bpm.to_be_bytes(),
        };
        entries.push(GridEntry {
            position: marker.position_secs,
            value,
        });
    }

    let mut cursor = Cursor::new(Vec::with_capacity(7 + entries.len() * 8));
    GridHeader {
        version: BEAT_GRID_VERSION,
        count: entries.len() as u32,
    }
    .write(&mut cursor)?;
    for entry in &entries {
        entry.write(&mut cursor)?;
    }
    0u8.write_be(&mut cursor)?;

    let data = cursor.into_inner();
    *markers = decode_grid_markers(&data)?;
    Ok(data)
}

fn beats_between(marker: &GridMarker, next: &GridMarker) -> Result<u32> {
    let span = next.position_secs - marker.position_secs;
    let beats = span * marker.bpm / 60.0;
    let whole = beats.round();

    if !beats.is_finite() {
        return Err(Error::MarkerFormat(format!(
            "beats between grid markers at {}s and {}s is not finite",
            marker.position_secs, next.position_secs
        )));
    }
    if (beats - whole).abs() > BEAT_SNAP_TOLERANCE {
        return Err(Error::MarkerFormat(format!(
            "{} beats between grid markers at {}s and {}s is not a whole number",
            beats, marker.position_secs, next.position_secs
        )));
    }
    if whole < 1.0 || whole > u32::MAX as f32 {
        return Err(Error::MarkerFormat(format!(
            "grid marker at {}s spans {} beats",
            marker.position_secs, whole
        )));
    }

    let whole = whole as u32;
    if whole % BEATS_PER_BAR != 0 {
        return Err(Error::MarkerFormat(format!(
            "grid marker at {}s spans {} beats, not a multiple of {}",
            marker.position_secs, whole, BEATS_PER_BAR
        )));
    }
    Ok(whole)
}

/// Decode a complete BeatGrid field
pub fn decode_beat_grid_field(data: &[u8]) -> Result<Vec<GridMarker>> {
    decode_grid_markers(data)
}

/// Encode a complete BeatGrid field, normalizing `markers` in place
pub fn encode_beat_grid_field(markers: &mut Vec<GridMarker>) -> Result<Vec<u8>> {
    encode_grid_markers(markers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_marker_bytes() {
        let mut markers = vec![GridMarker::new(0.5, 128.0)];
        let data = encode_grid_markers(&mut markers).unwrap();

        let mut expected = vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x01];
        expected.extend_from_slice(&0.5f32.to_be_bytes());
        expected.extend_from_slice(&128.0f32.to_be_bytes());
        expected.push(0x00);
        assert_eq!(data, expected);
    }

    #[test]
    fn test_roundtrip_sorts_and_derives_bpm() {
        let mut markers = vec![
            GridMarker::new(16.0, 100.0),
            GridMarker::new(0.0, 120.0),
            GridMarker::new(8.0, 90.0),
        ];
        let data = encode_grid_markers(&mut markers).unwrap();

        assert_eq!(
            markers,
            vec![
                GridMarker::new(0.0, 120.0),
                GridMarker::new(8.0, 90.0),
                GridMarker::new(16.0, 100.0),
            ]
        );
        assert_eq!(decode_grid_markers(&data).unwrap(), markers);
        // 16 beats between the first two markers
        assert_eq!(&data[10..14], &16u32.to_be_bytes());
    }

    #[test]
    fn test_near_integer_beats_snap() {
        // 8 s at 120.05 BPM is 16.0067 beats; not close enough
        let mut off = vec![GridMarker::new(0.0, 120.05), GridMarker::new(8.0, 120.0)];
        assert!(matches!(
            encode_grid_markers(&mut off),
            Err(Error::MarkerFormat(_))
        ));

        // 8 s at 120.03 BPM is 16.004 beats; snaps to 16 and BPM becomes 120
        let mut close = vec![GridMarker::new(0.0, 120.03), GridMarker::new(8.0, 120.0)];
        encode_grid_markers(&mut close).unwrap();
        assert_eq!(close[0].bpm, 120.0);
    }

    #[test]
    fn test_beats_not_multiple_of_four() {
        // 3 s at 120 BPM is 6 beats
        let mut markers = vec![GridMarker::new(0.0, 120.0), GridMarker::new(3.0, 120.0)];
        assert!(matches!(
            encode_grid_markers(&mut markers),
            Err(Error::MarkerFormat(_))
        ));
    }

    #[test]
    fn test_non_integer_beats() {
        let mut markers = vec![GridMarker::new(0.0, 120.0), GridMarker::new(1.3, 120.0)];
        assert!(encode_grid_markers(&mut markers).is_err());
    }

    #[test]
    fn test_non_finite_markers_rejected() {
        let cases = [
            vec![GridMarker::new(0.0, f32::NAN), GridMarker::new(8.0, 120.0)],
            vec![GridMarker::new(0.0, f32::INFINITY), GridMarker::new(8.0, 120.0)],
            vec![GridMarker::new(0.0, 120.0), GridMarker::new(f32::NAN, 120.0)],
            vec![GridMarker::new(0.0, 120.0), GridMarker::new(8.0, f32::NAN)],
        ];
        for original in cases {
            let mut markers = original.clone();
            assert!(matches!(
                encode_grid_markers(&mut markers),
                Err(Error::MarkerFormat(_))
            ));
            assert_eq!(markers.len(), original.len());
            assert!(markers.iter().all(|m| m.bpm != 0.0));
        }
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let data = [0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            decode_grid_markers(&data),
            Err(Error::MarkerFormat(_))
        ));
    }

    #[test]
    fn test_decode_truncated() {
        let data = [0x01, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00];
        assert!(decode_grid_markers(&data).is_err());
    }

    #[test]
    fn test_empty_grid() {
        let mut markers = Vec::new();
        let data = encode_grid_markers(&mut markers).unwrap();
        assert_eq!(data, vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(decode_grid_markers(&data).unwrap().is_empty());
    }
}
