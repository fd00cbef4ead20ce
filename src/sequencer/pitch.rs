/// Pitch labels such as `do4` or `fa#3` and their MIDI note numbers
use crate::error::{Error, Result};

/// The 12 chromatic tone names, in semitone order starting from `do`.
pub const TONE_NAMES: [&str; 12] = [
    "do", "do#", "re", "re#", "mi", "fa", "fa#", "sol", "sol#", "la", "la#", "si",
];

/// `note_number(name, octave) = index_in_table(name) + (octave + 1) * 12`
pub fn note_number(name: &str, octave: u8) -> Result<u8> {
    let offset = TONE_NAMES
        .iter()
        .position(|tone| *tone == name)
        .ok_or_else(|| Error::InvalidPitchLabel(format!("{}{}", name, octave)))?;

    let note = offset as u32 + (octave as u32 + 1) * 12;
    u8::try_from(note)
        .ok()
        .filter(|n| *n <= 127)
        .ok_or_else(|| Error::InvalidPitchLabel(format!("{}{}", name, octave)))
}

/// Split a label into tone name and trailing octave digits.
pub fn split_pitch_label(label: &str) -> Result<(&str, u8)> {
    let name = label.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &label[name.len()..];

    if name.is_empty() || digits.is_empty() {
        return Err(Error::InvalidPitchLabel(label.to_string()));
    }

    let octave = digits
        .parse::<u8>()
        .map_err(|_| Error::InvalidPitchLabel(label.to_string()))?;
    Ok((name, octave))
}

pub fn parse_pitch_label(label: &str) -> Result<u8> {
    let (name, octave) = split_pitch_label(label)?;
    note_number(name, octave).map_err(|_| Error::InvalidPitchLabel(label.to_string()))
}

/// Reverse lookup, for display. Notes below octave 0 have no label.
pub fn pitch_label_for(note: u8) -> Option<String> {
    let octave = (note / 12).checked_sub(1)?;
    Some(format!("{}{}", TONE_NAMES[(note % 12) as usize], octave))
}
