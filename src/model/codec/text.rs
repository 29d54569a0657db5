use alloc::{format, string::String, vec::Vec};

use crate::model::{ModelError, Value};

/// Strips the trailing run of `fill` units from `data`.
///
/// Only a contiguous run at the end is removed; fill units in the middle of
/// the data are significant and kept. A partial unit at the end (odd length
/// for a two byte fill) is never stripped.
///
/// # Example
/// ```
/// use memory_model::model::codec::remove_tail;
///
/// assert_eq!(remove_tail(&[0x41, 0xFF, 0x42, 0xFF, 0xFF], &[0xFF]), &[0x41, 0xFF, 0x42]);
/// assert_eq!(remove_tail(&[1, 2, 0xFF, 0xFF], &[0xFF, 0xFF]), &[1, 2]);
/// ```
pub fn remove_tail<'a>(data: &'a [u8], fill: &[u8]) -> &'a [u8] {
    if fill.is_empty() {
        return data;
    }
    let mut end = data.len();
    while end >= fill.len() && &data[end - fill.len()..end] == fill {
        end -= fill.len();
    }
    &data[..end]
}

/// Pads `data` with repetitions of `fill` up to exactly `length` bytes.
///
/// The last fill unit is cut short when the remaining gap is not a multiple
/// of the unit size.
pub fn append_tail(mut data: Vec<u8>, length: usize, fill: &[u8]) -> Vec<u8> {
    let mut units = fill.iter().cycle();
    while data.len() < length {
        match units.next() {
            Some(byte) => data.push(*byte),
            None => data.push(0xFF),
        }
    }
    data
}

/// Decodes a fixed-length Latin-1 string.
pub fn decode_text(data: &[u8], fill: u8) -> Value {
    Value::Text(remove_tail(data, &[fill]).iter().map(|&b| char::from(b)).collect())
}

pub fn encode_text(field: &str, value: &Value, length: usize, fill: u8) -> Result<Vec<u8>, ModelError> {
    let text = match value {
        Value::Null => "",
        Value::Text(text) => text.as_str(),
        other => {
            return Err(ModelError::invalid_value(
                field,
                format!("expected a string, got {other:?}"),
            ));
        }
    };
    let mut bytes = Vec::with_capacity(length);
    for c in text.chars() {
        let code = u32::from(c);
        if code > 0xFF {
            return Err(ModelError::invalid_value(
                field,
                format!("character {c:?} cannot be stored"),
            ));
        }
        bytes.push(code as u8);
    }
    if bytes.len() > length {
        return Err(ModelError::invalid_value(
            field,
            format!("string is {} bytes, field holds {length}", bytes.len()),
        ));
    }
    Ok(append_tail(bytes, length, &[fill]))
}

/// Decodes a fill terminated list of byte values into `"1,2,3"`.
pub fn decode_csv(data: &[u8], fill: &[u8]) -> Value {
    let items: Vec<String> = remove_tail(data, fill)
        .iter()
        .map(|b| format!("{b}"))
        .collect();
    Value::Text(items.join(","))
}

pub fn encode_csv(field: &str, value: &Value, length: usize, fill: &[u8]) -> Result<Vec<u8>, ModelError> {
    let text = match value {
        Value::Null => "",
        Value::Text(text) => text.trim(),
        other => {
            return Err(ModelError::invalid_value(
                field,
                format!("expected a comma separated list, got {other:?}"),
            ));
        }
    };
    let mut bytes = Vec::with_capacity(length);
    if !text.is_empty() {
        for item in text.split(',') {
            let byte: u8 = item.trim().parse().map_err(|_| {
                ModelError::invalid_value(field, format!("`{item}` is not a byte value"))
            })?;
            bytes.push(byte);
        }
    }
    if bytes.len() > length {
        return Err(ModelError::invalid_value(
            field,
            format!("{} values given, field holds {length}", bytes.len()),
        ));
    }
    Ok(append_tail(bytes, length, fill))
}

/// Decodes a dotted address (`001.002.003.004`) or version (`1.2.3`).
pub fn decode_dotted(data: &[u8], zero_pad: bool) -> Value {
    let parts: Vec<String> = data
        .iter()
        .map(|b| if zero_pad { format!("{b:03}") } else { format!("{b}") })
        .collect();
    Value::Text(parts.join("."))
}

pub fn encode_dotted(field: &str, value: &Value, length: usize) -> Result<Vec<u8>, ModelError> {
    let text = value.as_str().ok_or_else(|| {
        ModelError::invalid_value(field, format!("expected a dotted string, got {value:?}"))
    })?;
    let bytes = text
        .split('.')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| ModelError::invalid_value(field, format!("`{text}` is not a dotted byte string")))?;
    if bytes.len() != length {
        return Err(ModelError::invalid_value(
            field,
            format!("`{text}` has {} parts, expected {length}", bytes.len()),
        ));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn only_the_trailing_run_is_stripped() {
        assert_eq!(
            decode_text(&[0x41, 0xFF, 0x42, 0xFF, 0xFF], 0xFF),
            Value::Text("A\u{FF}B".into())
        );
        assert_eq!(decode_text(&[0xFF; 4], 0xFF), Value::Text(String::new()));
        assert_eq!(decode_text(b"abcd", 0xFF), Value::Text("abcd".into()));
        assert_eq!(decode_text(&[0x41, 0x00, 0x00], 0x00), Value::Text("A".into()));
    }

    #[test]
    fn two_byte_fill_keeps_partial_units() {
        assert_eq!(remove_tail(&[7, 0xFF, 0xFF, 0xFF], &[0xFF, 0xFF]), &[7, 0xFF]);
        assert_eq!(append_tail(vec![1, 2, 3], 6, &[0xFF, 0xFF]), [1, 2, 3, 0xFF, 0xFF, 0xFF]);
        assert_eq!(append_tail(vec![1, 2], 2, &[0xFF]), [1, 2]);
    }

    #[test]
    fn text_pads_to_the_exact_length() {
        assert_eq!(
            encode_text("name", &Value::from("Hi"), 5, 0xFF).unwrap(),
            [b'H', b'i', 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(encode_text("name", &Value::Null, 2, 0xFF).unwrap(), [0xFF, 0xFF]);
        assert!(encode_text("name", &Value::from("too long"), 4, 0xFF).is_err());
        assert!(encode_text("name", &Value::from("€"), 4, 0xFF).is_err());
        // Latin-1 round trip of a non ASCII character
        let bytes = encode_text("name", &Value::from("é"), 2, 0xFF).unwrap();
        assert_eq!(bytes, [0xE9, 0xFF]);
        assert_eq!(decode_text(&bytes, 0xFF), Value::from("é"));
    }

    #[test]
    fn csv_lists() {
        assert_eq!(decode_csv(&[1, 2, 3, 0xFF, 0xFF], &[0xFF]), Value::from("1,2,3"));
        assert_eq!(decode_csv(&[0xFF; 3], &[0xFF]), Value::from(""));
        assert_eq!(
            encode_csv("links", &Value::from("1, 2,3"), 5, &[0xFF]).unwrap(),
            [1, 2, 3, 0xFF, 0xFF]
        );
        assert_eq!(encode_csv("links", &Value::from(""), 2, &[0xFF]).unwrap(), [0xFF, 0xFF]);
        assert!(encode_csv("links", &Value::from("1,2,3"), 2, &[0xFF]).is_err());
        assert!(encode_csv("links", &Value::from("1,x"), 4, &[0xFF]).is_err());

        // Basic action lists are terminated by a 0xFFFF word
        assert_eq!(
            encode_csv("actions", &Value::from("160,3"), 6, &[0xFF, 0xFF]).unwrap(),
            [160, 3, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            decode_csv(&[160, 3, 0xFF, 0xFF, 0xFF, 0xFF], &[0xFF, 0xFF]),
            Value::from("160,3")
        );
    }

    #[test]
    fn dotted_strings() {
        assert_eq!(decode_dotted(&[1, 2, 3, 4], true), Value::from("001.002.003.004"));
        assert_eq!(decode_dotted(&[3, 12, 0], false), Value::from("3.12.0"));
        assert_eq!(
            encode_dotted("address", &Value::from("001.002.003.004"), 4).unwrap(),
            [1, 2, 3, 4]
        );
        assert!(encode_dotted("address", &Value::from("1.2.3"), 4).is_err());
        assert!(encode_dotted("address", &Value::from("1.2.3.256"), 4).is_err());
    }
}
