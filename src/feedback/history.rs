//! Feedback History edge encoding (spec.md §4.8): "a sequence of `0x80`
//! + button-code (+ optional state byte) records per the code table."

/// One entry of the normative button code table (spec.md §4.8).
struct ButtonCode {
    mask: u64,
    /// Code to emit on press. For most buttons this equals `release` and
    /// the press/release distinction instead rides in a trailing state
    /// byte (`0xff`/`0x00`); for the handful of buttons the table gives
    /// distinct press/release codes, `press != release` and no state
    /// byte is emitted.
    press: u8,
    release: u8,
    uses_state_byte: bool,
}

const BUTTON_TABLE: &[ButtonCode] = &[
    ButtonCode { mask: 0x0001, press: 0x88, release: 0x88, uses_state_byte: true }, // Cross
    ButtonCode { mask: 0x0002, press: 0x89, release: 0x89, uses_state_byte: true }, // Circle
    ButtonCode { mask: 0x0004, press: 0x8a, release: 0x8a, uses_state_byte: true }, // Square
    ButtonCode { mask: 0x0008, press: 0x8b, release: 0x8b, uses_state_byte: true }, // Triangle
    ButtonCode { mask: 0x0010, press: 0x82, release: 0x82, uses_state_byte: true }, // DPad Left
    ButtonCode { mask: 0x0020, press: 0x80, release: 0x80, uses_state_byte: true }, // DPad Up
    ButtonCode { mask: 0x0040, press: 0x83, release: 0x83, uses_state_byte: true }, // DPad Right
    ButtonCode { mask: 0x0080, press: 0x81, release: 0x81, uses_state_byte: true }, // DPad Down
    ButtonCode { mask: 0x0100, press: 0x84, release: 0x84, uses_state_byte: true }, // L1
    ButtonCode { mask: 0x0200, press: 0x85, release: 0x85, uses_state_byte: true }, // R1
    ButtonCode { mask: 0x1000, press: 0xac, release: 0x8c, uses_state_byte: false }, // Options
    ButtonCode { mask: 0x2000, press: 0xad, release: 0x8d, uses_state_byte: false }, // Share
    ButtonCode { mask: 0x4000, press: 0xaf, release: 0x8f, uses_state_byte: false }, // L3
    ButtonCode { mask: 0x8000, press: 0xb0, release: 0x90, uses_state_byte: false }, // R3
    ButtonCode { mask: 0x10000, press: 0xae, release: 0x8e, uses_state_byte: false }, // PS
    ButtonCode { mask: 0x100000, press: 0xb1, release: 0x91, uses_state_byte: false }, // Touchpad
];

const TRIGGER_L2_CODE: u8 = 0x86;
const TRIGGER_R2_CODE: u8 = 0x87;
const PREFIX: u8 = 0x80;

/// Diff two button bitmaps plus trigger levels into a flat byte stream
/// of history records. Empty if nothing edged.
pub fn diff(
    old_buttons: u64,
    new_buttons: u64,
    old_l2: u8,
    new_l2: u8,
    old_r2: u8,
    new_r2: u8,
) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in BUTTON_TABLE {
        let was_down = old_buttons & entry.mask != 0;
        let is_down = new_buttons & entry.mask != 0;
        if was_down == is_down {
            continue;
        }
        out.push(PREFIX);
        if entry.uses_state_byte {
            out.push(entry.release); // press == release for these rows
            out.push(if is_down { 0xff } else { 0x00 });
        } else {
            out.push(if is_down { entry.press } else { entry.release });
        }
    }
    if old_l2 != new_l2 {
        out.push(PREFIX);
        out.push(TRIGGER_L2_CODE);
        out.push(new_l2);
    }
    if old_r2 != new_r2 {
        out.push(PREFIX);
        out.push(TRIGGER_R2_CODE);
        out.push(new_r2);
    }
    out
}
