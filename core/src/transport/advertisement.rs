//! Advertisement encoding for radio frames
//!
//! Frames ride in a manufacturer-specific data AD structure under the
//! Adafruit company identifier, inside a single keyed sub-field:
//!
//! [1 byte]  AD length (type + data)
//! [1 byte]  AD type 0xFF (manufacturer specific data)
//! [2 bytes] company id (LE u16, 0x0822)
//! [1 byte]  field length (key + value)
//! [2 bytes] field key (LE u16, 0x0001 = radio frame)
//! [N bytes] frame
//!
//! The whole structure must fit a legacy advertising PDU.

use thiserror::Error;

/// AD type for manufacturer specific data
pub const MANUFACTURER_DATA_ADT: u8 = 0xFF;

/// Bluetooth SIG company identifier assigned to Adafruit
pub const ADAFRUIT_COMPANY_ID: u16 = 0x0822;

/// Manufacturer-data field key carrying a radio frame
pub const RADIO_DATA_ID: u16 = 0x0001;

/// Legacy advertising data capacity in bytes
pub const LEGACY_ADVERTISEMENT_MAX: usize = 31;

/// Bytes added around the frame: length, type, company, field length, field key
pub const ADVERTISEMENT_OVERHEAD: usize = 7;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdvertisementError {
    #[error("Advertisement too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },
    #[error("Truncated AD structure")]
    Truncated,
    #[error("No manufacturer data in advertisement")]
    NotManufacturerData,
    #[error("Manufacturer data from foreign company 0x{0:04x}")]
    ForeignCompany(u16),
    #[error("Manufacturer data has no radio field")]
    MissingField,
}

/// Wrap a frame in a manufacturer-data AD structure
pub fn encode_advertisement(frame: &[u8]) -> Result<Vec<u8>, AdvertisementError> {
    let total = ADVERTISEMENT_OVERHEAD + frame.len();
    if total > LEGACY_ADVERTISEMENT_MAX {
        return Err(AdvertisementError::TooLong {
            len: total,
            max: LEGACY_ADVERTISEMENT_MAX,
        });
    }

    let mut bytes = Vec::with_capacity(total);
    bytes.push((total - 1) as u8);
    bytes.push(MANUFACTURER_DATA_ADT);
    bytes.extend_from_slice(&ADAFRUIT_COMPANY_ID.to_le_bytes());
    bytes.push((2 + frame.len()) as u8);
    bytes.extend_from_slice(&RADIO_DATA_ID.to_le_bytes());
    bytes.extend_from_slice(frame);
    Ok(bytes)
}

/// Extract the radio frame from raw advertising data.
///
/// All AD structures are walked, so flags or name structures ahead of the
/// manufacturer data are tolerated. A zero length byte marks trailing padding.
pub fn decode_advertisement(data: &[u8]) -> Result<Vec<u8>, AdvertisementError> {
    let mut outcome = AdvertisementError::NotManufacturerData;
    let mut pos = 0;

    while pos < data.len() {
        let ad_len = data[pos] as usize;
        if ad_len == 0 {
            break;
        }
        let end = pos + 1 + ad_len;
        if end > data.len() {
            return Err(AdvertisementError::Truncated);
        }

        let ad_type = data[pos + 1];
        let body = &data[pos + 2..end];
        pos = end;

        if ad_type != MANUFACTURER_DATA_ADT {
            continue;
        }
        if body.len() < 2 {
            return Err(AdvertisementError::Truncated);
        }

        let company = u16::from_le_bytes([body[0], body[1]]);
        if company != ADAFRUIT_COMPANY_ID {
            outcome = AdvertisementError::ForeignCompany(company);
            continue;
        }

        match find_field(&body[2..], RADIO_DATA_ID)? {
            Some(frame) => return Ok(frame.to_vec()),
            None => outcome = AdvertisementError::MissingField,
        }
    }

    Err(outcome)
}

/// Walk the keyed sub-fields of Adafruit manufacturer data
fn find_field(fields: &[u8], key: u16) -> Result<Option<&[u8]>, AdvertisementError> {
    let mut pos = 0;
    while pos < fields.len() {
        let field_len = fields[pos] as usize;
        let end = pos + 1 + field_len;
        if field_len < 2 || end > fields.len() {
            return Err(AdvertisementError::Truncated);
        }

        let field_key = u16::from_le_bytes([fields[pos + 1], fields[pos + 2]]);
        if field_key == key {
            return Ok(Some(&fields[pos + 3..end]));
        }
        pos = end;
    }
    Ok(None)
}
