//! Decoded RuuviTag reading as handed to the observer.

use serde::Deserialize;

/// A decoded advertisement from one RuuviTag.
///
/// Values keep the scaling of the Ruuvi protocol; the observer converts them
/// when writing metric series:
/// - Battery voltage in millivolts
/// - Pressure in Pascals
/// - Humidity in hundredths of a percent
/// - Temperature in Celsius
/// - Acceleration in g
/// - TX power in dBm
///
/// A field is `None` when the advertisement did not carry it.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Reading {
    /// Device address as reported by the scanner, in any letter case
    pub address: String,
    /// Received signal strength in dBm
    pub rssi: i16,
    pub voltage: Option<u16>,
    pub pressure: Option<u32>,
    pub temperature: Option<f64>,
    pub humidity: Option<u16>,
    pub acceleration: Option<Acceleration>,
    pub tx_power: Option<i8>,
    pub move_count: Option<u32>,
    pub seqno: Option<u32>,
    /// Undecoded manufacturer data, optionally led by the `99 04` vendor id
    #[serde(default, rename = "raw", with = "hex::serde")]
    pub raw_bytes: Vec<u8>,
}

/// Three-axis acceleration in g.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Reading {
    /// Guess the Ruuvi data format the reading came from.
    ///
    /// Format 3 frames carry neither TX power, movement counter nor sequence
    /// number; anything that has one of them is treated as format 5.
    pub fn data_format(&self) -> u8 {
        if self.tx_power.is_none() && self.move_count.is_none() && self.seqno.is_none() {
            3
        } else {
            5
        }
    }
}
