//! `ControllerState` and its 28-byte packed wire form (spec.md §3, §4.8).

/// One snapshot of the virtual controller (spec.md §3: "sticks (4× int16),
/// triggers L2/R2 (uint8), button bitmap (ulong), 3-axis gyro/accel
/// (float), orientation quaternion (4× float), touchpad points").
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub sticks: [i16; 4],
    pub l2: u8,
    pub r2: u8,
    pub buttons: u64,
    pub gyro: [f32; 3],
    pub accel: [f32; 3],
    /// `(x, y, w, z)`, unit quaternion.
    pub orientation: [f32; 4],
    pub touchpad: Vec<(u16, u16)>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            sticks: [0; 4],
            l2: 0,
            r2: 0,
            buttons: 0,
            gyro: [0.0; 3],
            accel: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
            touchpad: Vec::new(),
        }
    }
}

const FLOAT_EPSILON: f32 = 1e-4;

impl ControllerState {
    /// Field-wise equality with `ε = 1e-4` for floats (spec.md §4.8:
    /// "State comparison uses field-wise equality with ε = 1e-4 for
    /// floats").
    pub fn approx_eq(&self, other: &ControllerState) -> bool {
        self.sticks == other.sticks
            && self.l2 == other.l2
            && self.r2 == other.r2
            && self.buttons == other.buttons
            && self.touchpad == other.touchpad
            && floats_close(&self.gyro, &other.gyro)
            && floats_close(&self.accel, &other.accel)
            && floats_close(&self.orientation, &other.orientation)
    }

    /// Pack into the 28-byte `Feedback State` record (spec.md §4.8).
    pub fn pack(&self) -> [u8; 28] {
        let mut out = [0u8; 28];
        for (i, &v) in self.gyro.iter().enumerate() {
            let scaled = scale_to_u16(v, -30.0, 30.0);
            out[i * 2..i * 2 + 2].copy_from_slice(&scaled.to_le_bytes());
        }
        for (i, &v) in self.accel.iter().enumerate() {
            let scaled = scale_to_u16(v, -5.0, 5.0);
            out[6 + i * 2..6 + i * 2 + 2].copy_from_slice(&scaled.to_le_bytes());
        }
        let quat = pack_quaternion(self.orientation);
        out[12..16].copy_from_slice(&quat.to_le_bytes());
        for (i, &v) in self.sticks.iter().enumerate() {
            out[16 + i * 2..16 + i * 2 + 2].copy_from_slice(&v.to_be_bytes());
        }
        out[24] = 0x00;
        out[25] = 0x00;
        out[26] = 0x01;
        out[27] = 0x00;
        out
    }

    /// Inverse of `pack`, to the quaternion-compression tolerance
    /// (spec.md §8: "ControllerState pack → unpack → equal struct (with
    /// quaternion tolerance ε ≤ 2^-9)"). `touchpad`, `l2`/`r2`, and
    /// `buttons` are not carried by the STATE record and come back
    /// default/zeroed — those travel over the HISTORY stream instead.
    pub fn unpack(bytes: &[u8; 28]) -> ControllerState {
        let mut gyro = [0.0f32; 3];
        let mut accel = [0.0f32; 3];
        for i in 0..3 {
            gyro[i] = unscale_from_u16(
                u16::from_le_bytes(bytes[i * 2..i * 2 + 2].try_into().unwrap()),
                -30.0,
                30.0,
            );
            accel[i] = unscale_from_u16(
                u16::from_le_bytes(bytes[6 + i * 2..6 + i * 2 + 2].try_into().unwrap()),
                -5.0,
                5.0,
            );
        }
        let quat_bits = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let orientation = unpack_quaternion(quat_bits);
        let mut sticks = [0i16; 4];
        for i in 0..4 {
            sticks[i] = i16::from_be_bytes(bytes[16 + i * 2..16 + i * 2 + 2].try_into().unwrap());
        }
        ControllerState {
            sticks,
            orientation,
            gyro,
            accel,
            ..Default::default()
        }
    }
}

fn floats_close(a: &[f32], b: &[f32]) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= FLOAT_EPSILON)
}

fn scale_to_u16(value: f32, min: f32, max: f32) -> u16 {
    let clamped = value.clamp(min, max);
    let normalized = (clamped - min) / (max - min);
    (normalized * 65535.0).round() as u16
}

fn unscale_from_u16(raw: u16, min: f32, max: f32) -> f32 {
    min + (raw as f32 / 65535.0) * (max - min)
}

const SQRT2_OVER_2: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Largest-component quaternion compression: store which of the 4
/// components has the largest magnitude (2 bits), its sign (1 bit), and
/// the other three components quantized to 9 bits each over
/// `[-√2/2, √2/2]` (spec.md §4.8).
fn pack_quaternion(q: [f32; 4]) -> u32 {
    let (largest_index, largest_sign) = q
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
        .map(|(i, v)| (i, v.is_sign_negative()))
        .unwrap_or((3, false));

    let others: Vec<f32> = q
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != largest_index)
        .map(|(_, &v)| if largest_sign { -v } else { v })
        .collect();

    let mut bits: u32 = (largest_index as u32) << 30;
    bits |= (largest_sign as u32) << 29;
    for (i, &component) in others.iter().enumerate() {
        let quantized = quantize_component(component);
        bits |= (quantized as u32) << (i * 9);
    }
    bits
}

fn unpack_quaternion(bits: u32) -> [f32; 4] {
    let largest_index = (bits >> 30) & 0b11;
    let largest_sign = ((bits >> 29) & 1) != 0;

    let mut others = [0.0f32; 3];
    for (i, slot) in others.iter_mut().enumerate() {
        let raw = (bits >> (i * 9)) & 0x1FF;
        *slot = dequantize_component(raw as u16);
    }

    let sum_sq: f32 = others.iter().map(|c| c * c).sum();
    let largest_mag = (1.0 - sum_sq).max(0.0).sqrt();
    let largest = if largest_sign { -largest_mag } else { largest_mag };

    let mut out = [0.0f32; 4];
    let mut oi = 0;
    for i in 0..4 {
        if i as u32 == largest_index {
            out[i] = largest;
        } else {
            out[i] = others[oi];
            oi += 1;
        }
    }
    out
}

/// Quantize a component in `[-√2/2, √2/2]` to 9 bits.
fn quantize_component(value: f32) -> u16 {
    let clamped = value.clamp(-SQRT2_OVER_2, SQRT2_OVER_2);
    let normalized = (clamped + SQRT2_OVER_2) / (2.0 * SQRT2_OVER_2);
    (normalized * 511.0).round() as u16
}

fn dequantize_component(raw: u16) -> f32 {
    let normalized = raw as f32 / 511.0;
    normalized * (2.0 * SQRT2_OVER_2) - SQRT2_OVER_2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips_sticks_and_motion() {
        let state = ControllerState {
            sticks: [-12000, 300, 32000, -1],
            gyro: [10.0, -20.0, 5.0],
            accel: [1.0, -2.5, 4.9],
            orientation: [0.0, 0.0, 0.0, 1.0],
            ..Default::default()
        };
        let packed = state.pack();
        assert_eq!(packed.len(), 28);
        let unpacked = ControllerState::unpack(&packed);
        assert_eq!(unpacked.sticks, state.sticks);
        for (a, b) in state.gyro.iter().zip(unpacked.gyro.iter()) {
            assert!((a - b).abs() < 0.01, "{a} vs {b}");
        }
    }

    #[test]
    fn identity_quaternion_round_trips_within_tolerance() {
        let bits = pack_quaternion([0.0, 0.0, 0.0, 1.0]);
        let unpacked = unpack_quaternion(bits);
        let tolerance = 2f32.powi(-9) * 4.0;
        for (a, b) in [0.0, 0.0, 0.0, 1.0].iter().zip(unpacked.iter()) {
            assert!((a - b).abs() < tolerance, "{a} vs {b}");
        }
    }

    #[test]
    fn trailing_bytes_match_spec_constant() {
        let packed = ControllerState::default().pack();
        assert_eq!(&packed[24..28], &[0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn approx_eq_tolerates_tiny_float_drift() {
        let a = ControllerState::default();
        let mut b = a.clone();
        b.gyro[0] += 1e-5;
        assert!(a.approx_eq(&b));
        b.gyro[0] += 1.0;
        assert!(!a.approx_eq(&b));
    }
}
