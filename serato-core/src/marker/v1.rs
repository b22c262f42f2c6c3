//! Legacy "Serato Markers_" field
//!
//! Fixed slots: 5 hot cues followed by 9 loops. Each slot exists in two
//! layouts carrying the same fields:
//!
//! Raw (19 bytes, MP4/base64 containers):
//! ```text
//! position (4) | loop end (4) | 00 | loop iterations (4) | 00 rgb (4) | kind | locked
//! ```
//! Encoded (22 bytes, ID3 containers), every multi-byte value split into
//! 7-bit groups so no byte has its high bit set:
//! ```text
//! set | position (4) | set | loop end (4) | 00 | iterations (5) | rgb (4) | kind | locked
//! ```
//! A slot is empty when its position is 0xFFFFFFFF (raw) / flagged 0x7F (encoded).
//!
//! Field framing for both layouts: version 02 05, 4-byte slot count, the
//! slots, then the track colour (raw: 00 rgb, encoded: 4 bytes of 7-bit groups).

use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use super::{CueMarker, LoopMarker, Rgb};
use crate::error::{Error, Result};
use crate::store::LegacyLayout;

pub const LEGACY_VERSION: [u8; 2] = [0x02, 0x05];

pub const CUE_SLOTS: usize = 5;
pub const LOOP_SLOTS: usize = 9;

/// Position value of an empty slot
pub const UNSET: u32 = 0xFFFF_FFFF;

pub const RAW_SLOT_SIZE: usize = 19;
pub const ENCODED_SLOT_SIZE: usize = 22;

const FIELD_HEADER_SIZE: usize = 6;
const TRACK_COLOR_SIZE: usize = 4;

const KIND_EMPTY: u8 = 0;
const KIND_CUE: u8 = 1;
const KIND_LOOP: u8 = 3;

const POSITION_SET: u8 = 0x00;
const POSITION_UNSET: u8 = 0x7F;

/// Largest value that fits in four 7-bit groups
const MAX_PACKED_28: u32 = (1 << 28) - 1;

/// Slot in the raw layout
#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSlotV1 {
    pub position: u32,
    pub loop_position: u32,
    pub zero: u8,
    pub loop_iterations: u32,
    pub color: [u8; 4],
    pub kind: u8,
    pub locked: u8,
}

/// Slot in the 7-bit encoded layout
#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedSlotV1 {
    pub position_set: u8,
    pub position: [u8; 4],
    pub loop_set: u8,
    pub loop_position: [u8; 4],
    pub zero: u8,
    pub loop_iterations: [u8; 5],
    pub color: [u8; 4],
    pub kind: u8,
    pub locked: u8,
}

impl RawSlotV1 {
    /// Slot with no marker in it
    pub fn empty(kind: u8) -> Self {
        Self {
            position: UNSET,
            loop_position: UNSET,
            zero: 0,
            loop_iterations: UNSET,
            color: [0; 4],
            kind,
            locked: 0,
        }
    }

    pub fn is_set(&self) -> bool {
        self.position != UNSET
    }

    pub fn rgb(&self) -> Rgb {
        Rgb::new(self.color[1], self.color[2], self.color[3])
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(RAW_SLOT_SIZE));
        self.write_be(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::read_be(&mut Cursor::new(bytes))?)
    }

    /// Re-pack into the 7-bit layout
    pub fn encode(&self) -> Result<EncodedSlotV1> {
        let (position_set, position) = encode_position(self.position)?;
        let (loop_set, loop_position) = encode_position(self.loop_position)?;

        let loop_iterations = if self.loop_iterations == UNSET {
            [POSITION_UNSET; 5]
        } else {
            pack7::<5>(self.loop_iterations)
        };

        let color = u32::from_be_bytes(self.color);
        if color > MAX_PACKED_28 {
            return Err(Error::MarkerFormat(format!(
                "colour {:08X} does not fit the encoded layout",
                color
            )));
        }

        Ok(EncodedSlotV1 {
            position_set,
            position,
            loop_set,
            loop_position,
            zero: self.zero,
            loop_iterations,
            color: pack7::<4>(color),
            kind: self.kind,
            locked: self.locked,
        })
    }
}

impl EncodedSlotV1 {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(ENCODED_SLOT_SIZE));
        self.write_be(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::read_be(&mut Cursor::new(bytes))?)
    }

    /// Unpack into the raw layout
    pub fn decode(&self) -> Result<RawSlotV1> {
        let loop_iterations = if self.loop_iterations == [POSITION_UNSET; 5] {
            UNSET
        } else {
            match unpack7(&self.loop_iterations)? {
                UNSET => {
                    return Err(Error::MarkerFormat(
                        "non-canonical empty loop iteration count".into(),
                    ))
                }
                value => value,
            }
        };

        Ok(RawSlotV1 {
            position: decode_position(self.position_set, &self.position)?,
            loop_position: decode_position(self.loop_set, &self.loop_position)?,
            zero: self.zero,
            loop_iterations,
            color: unpack7(&self.color)?.to_be_bytes(),
            kind: self.kind,
            locked: self.locked,
        })
    }
}

fn encode_position(value: u32) -> Result<(u8, [u8; 4])> {
    if value == UNSET {
        return Ok((POSITION_UNSET, [POSITION_UNSET; 4]));
    }
    if value > MAX_PACKED_28 {
        return Err(Error::MarkerFormat(format!(
            "position {} ms does not fit the encoded layout",
            value
        )));
    }
    Ok((POSITION_SET, pack7::<4>(value)))
}

fn decode_position(set: u8, bytes: &[u8; 4]) -> Result<u32> {
    if set == POSITION_UNSET {
        Ok(UNSET)
    } else {
        unpack7(bytes)
    }
}

/// Split a value into N big-endian 7-bit groups
fn pack7<const N: usize>(value: u32) -> [u8; N] {
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        let shift = 7 * (N - 1 - i);
        *byte = ((u64::from(value) >> shift) & 0x7F) as u8;
    }
    out
}

/// Join big-endian 7-bit groups back into a value
fn unpack7(bytes: &[u8]) -> Result<u32> {
    let mut value = 0u64;
    for &byte in bytes {
        if byte & 0x80 != 0 {
            return Err(Error::MarkerFormat(format!(
                "byte {:02X} is not 7-bit clean",
                byte
            )));
        }
        value = (value << 7) | u64::from(byte);
    }
    u32::try_from(value)
        .map_err(|_| Error::MarkerFormat(format!("7-bit value {:X} overflows 32 bits", value)))
}

impl CueMarker {
    /// Raw slot for this cue; the slot number is its index
    pub fn to_raw_v1(&self) -> RawSlotV1 {
        RawSlotV1 {
            position: self.position_ms,
            loop_position: UNSET,
            zero: 0,
            loop_iterations: UNSET,
            color: [0, self.color.red, self.color.green, self.color.blue],
            kind: KIND_CUE,
            locked: 0,
        }
    }

    pub fn from_raw_v1(slot: &RawSlotV1, index: u8) -> Self {
        Self {
            label: String::new(),
            position_ms: slot.position,
            index,
            color: slot.rgb(),
        }
    }
}

impl LoopMarker {
    pub fn to_raw_v1(&self) -> RawSlotV1 {
        RawSlotV1 {
            position: self.start_ms,
            loop_position: self.end_ms,
            zero: 0,
            loop_iterations: UNSET,
            color: [0, self.color.red, self.color.green, self.color.blue],
            kind: KIND_LOOP,
            locked: u8::from(self.locked),
        }
    }

    pub fn from_raw_v1(slot: &RawSlotV1, index: u8) -> Self {
        Self {
            label: String::new(),
            start_ms: slot.position,
            end_ms: slot.loop_position,
            index,
            color: slot.rgb(),
            locked: slot.locked != 0,
        }
    }
}

/// Markers recovered from the legacy field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyMarkers {
    pub cues: Vec<CueMarker>,
    pub loops: Vec<LoopMarker>,
    pub track_color: Rgb,
}

/// Decode a complete legacy field in the given layout
pub fn decode_legacy_field(data: &[u8], layout: LegacyLayout) -> Result<LegacyMarkers> {
    if data.len() < FIELD_HEADER_SIZE || data[..2] != LEGACY_VERSION {
        return Err(Error::MarkerFormat(format!(
            "unsupported Markers_ version {:02X?}",
            &data[..data.len().min(2)]
        )));
    }

    let count = u32::from_be_bytes([data[2], data[3], data[4], data[5]]) as usize;
    let slot_size = match layout {
        LegacyLayout::Raw => RAW_SLOT_SIZE,
        LegacyLayout::Encoded => ENCODED_SLOT_SIZE,
    };
    let slots_end = count
        .checked_mul(slot_size)
        .and_then(|len| len.checked_add(FIELD_HEADER_SIZE))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            Error::MarkerFormat(format!("Markers_ field too short for {} slots", count))
        })?;

    let mut cursor = Cursor::new(&data[FIELD_HEADER_SIZE..slots_end]);
    let mut markers = LegacyMarkers {
        cues: Vec::new(),
        loops: Vec::new(),
        track_color: Rgb::WHITE,
    };

    for slot_number in 0..count {
        let slot = match layout {
            LegacyLayout::Raw => RawSlotV1::read_be(&mut cursor)?,
            LegacyLayout::Encoded => EncodedSlotV1::read_be(&mut cursor)?.decode()?,
        };
        if !slot.is_set() {
            continue;
        }

        if slot_number < CUE_SLOTS {
            markers.cues.push(CueMarker::from_raw_v1(&slot, slot_number as u8));
        } else if slot_number < CUE_SLOTS + LOOP_SLOTS {
            let index = (slot_number - CUE_SLOTS) as u8;
            markers.loops.push(LoopMarker::from_raw_v1(&slot, index));
        }
    }

    if let Some(color) = data.get(slots_end..slots_end + TRACK_COLOR_SIZE) {
        markers.track_color = match layout {
            LegacyLayout::Raw => Rgb::new(color[1], color[2], color[3]),
            LegacyLayout::Encoded => Rgb::from_u32(unpack7(color)?),
        };
    }

    Ok(markers)
}

/// Encode cues and loops into a complete legacy field.
/// Markers whose index has no slot are left out.
pub fn encode_legacy_field(
    cues: &[CueMarker],
    loops: &[LoopMarker],
    track_color: Rgb,
    layout: LegacyLayout,
) -> Result<Vec<u8>> {
    let mut slots = Vec::with_capacity(CUE_SLOTS + LOOP_SLOTS);
    for index in 0..CUE_SLOTS {
        let slot = cues
            .iter()
            .find(|cue| usize::from(cue.index) == index)
            .map(CueMarker::to_raw_v1)
            .unwrap_or_else(|| RawSlotV1::empty(KIND_EMPTY));
        slots.push(slot);
    }
    for index in 0..LOOP_SLOTS {
        let slot = loops
            .iter()
            .find(|lp| usize::from(lp.index) == index)
            .map(LoopMarker::to_raw_v1)
            .unwrap_or_else(|| RawSlotV1::empty(KIND_LOOP));
        slots.push(slot);
    }

    let mut cursor = Cursor::new(Vec::with_capacity(
        FIELD_HEADER_SIZE + slots.len() * ENCODED_SLOT_SIZE + TRACK_COLOR_SIZE,
    ));
    LEGACY_VERSION.write_be(&mut cursor)?;
    (slots.len() as u32).write_be(&mut cursor)?;

    for slot in &slots {
        match layout {
            LegacyLayout::Raw => slot.write_be(&mut cursor)?,
            LegacyLayout::Encoded => slot.encode()?.write_be(&mut cursor)?,
        }
    }

    let color = match layout {
        LegacyLayout::Raw => [0, track_color.red, track_color.green, track_color.blue],
        LegacyLayout::Encoded => pack7::<4>(track_color.to_u32()),
    };
    color.write_be(&mut cursor)?;

    Ok(cursor.into_inner())
}
