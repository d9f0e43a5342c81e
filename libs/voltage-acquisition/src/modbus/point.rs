//! Point compiler
//!
//! Turns a `TagDeclaration` into a wire-ready `Point`: applies the address
//! base, computes how many registers or bits the declared type occupies and
//! rejects combinations the protocol cannot represent.

use super::types::{Area, DataType, Point, PointOptions, TagDeclaration};
use crate::error::{AcqError, Result};

/// Highest bit offset inside a 16-bit register
const MAX_BIT_OFFSET: u8 = 15;

/// Size of the 16-bit protocol address space
const ADDRESS_SPACE: u32 = 0x1_0000;

/// Compile a tag declaration into a point
pub fn compile(tag: &TagDeclaration, address_base: u8) -> Result<Point> {
    let start_address = match address_base {
        0 => tag.address,
        1 => tag.address.checked_sub(1).ok_or_else(|| {
            AcqError::invalid_address(&tag.name, "address 0 is not valid with 1-based addressing")
        })?,
        other => {
            return Err(AcqError::Config(format!(
                "address_base must be 0 or 1, got {other}"
            )))
        },
    };

    let count = unit_count(tag)?;

    if u32::from(start_address) + u32::from(count) > ADDRESS_SPACE {
        return Err(AcqError::invalid_address(
            &tag.name,
            format!(
                "{} units at {} exceed the 16-bit address space",
                count, start_address
            ),
        ));
    }

    let bit = match (tag.area.is_bit_area(), tag.data_type) {
        (false, DataType::Bit) => tag.options.bit.unwrap_or(0),
        _ => 0,
    };

    Ok(Point {
        name: tag.name.clone(),
        slave_id: tag.slave_id,
        area: tag.area,
        start_address,
        count,
        data_type: tag.data_type,
        options: PointOptions {
            byte_order: tag.options.byte_order,
            bit,
            length: tag.options.length.unwrap_or(0),
            string_encoding: tag.options.string_encoding,
        },
    })
}

/// Registers (register areas) or bits (bit areas) the tag occupies
fn unit_count(tag: &TagDeclaration) -> Result<u16> {
    if tag.area.is_bit_area() {
        if tag.data_type != DataType::Bit {
            return Err(AcqError::invalid_address(
                &tag.name,
                format!("{} area only holds bit values", tag.area),
            ));
        }
        return Ok(1);
    }

    match tag.data_type {
        DataType::Bit => {
            let bit = tag.options.bit.unwrap_or(0);
            if bit > MAX_BIT_OFFSET {
                return Err(AcqError::invalid_address(
                    &tag.name,
                    format!("bit offset {bit} is outside 0..=15"),
                ));
            }
            Ok(1)
        },
        DataType::String => {
            let length = required_length(tag)?;
            Ok(tag.options.string_encoding.register_count(length))
        },
        DataType::Bytes => Ok(required_length(tag)?.div_ceil(2)),
        fixed => fixed.fixed_register_count().ok_or_else(|| {
            AcqError::invalid_address(&tag.name, format!("{fixed:?} has no register width"))
        }),
    }
}

fn required_length(tag: &TagDeclaration) -> Result<u16> {
    match tag.options.length {
        Some(length) if length > 0 => Ok(length),
        _ => Err(AcqError::invalid_address(
            &tag.name,
            "string and bytes tags need a non-zero length",
        )),
    }
}

/// Compile every tag, collecting failures separately
///
/// Returns the compiled points in input order plus `(tag name, error)` for
/// each tag that could not be compiled.
pub fn compile_all(
    tags: &[TagDeclaration],
    address_base: u8,
) -> (Vec<Point>, Vec<(String, AcqError)>) {
    let mut points = Vec::with_capacity(tags.len());
    let mut rejected = Vec::new();
    for tag in tags {
        match compile(tag, address_base) {
            Ok(point) => points.push(point),
            Err(err) => rejected.push((tag.name.clone(), err)),
        }
    }
    (points, rejected)
}

/// True when the area/type combination can be written
pub fn is_writable(point: &Point) -> bool {
    // A bit inside a holding register would need read-modify-write
    let register_bit = point.area == Area::HoldingRegister && point.data_type == DataType::Bit;
    point.area.is_writable() && !register_bit
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::bytes::ByteOrder;
    use crate::modbus::types::StringEncoding;

    fn holding(name: &str, address: u16, data_type: DataType) -> TagDeclaration {
        TagDeclaration::new(name, 1, Area::HoldingRegister, address, data_type)
    }

    #[test]
    fn test_one_based_address_is_shifted() {
        let point = compile(&holding("t", 1, DataType::Uint16), 1).unwrap();
        assert_eq!(point.start_address, 0);
        assert_eq!(point.count, 1);

        let point = compile(&holding("t", 1, DataType::Uint16), 0).unwrap();
        assert_eq!(point.start_address, 1);
    }

    #[test]
    fn test_address_zero_rejected_with_one_base() {
        let err = compile(&holding("t", 0, DataType::Uint16), 1).unwrap_err();
        assert!(matches!(err, AcqError::InvalidAddress { .. }));
    }

    #[test]
    fn test_register_counts_per_type() {
        let cases = [
            (DataType::Int16, 1),
            (DataType::Uint32, 2),
            (DataType::Float, 2),
            (DataType::Int64, 4),
            (DataType::Double, 4),
        ];
        for (data_type, expected) in cases {
            let point = compile(&holding("t", 10, data_type), 0).unwrap();
            assert_eq!(point.count, expected, "{data_type:?}");
        }
    }

    #[test]
    fn test_address_space_overflow() {
        let ok = compile(&holding("t", 65534, DataType::Uint32), 0).unwrap();
        assert_eq!(ok.end_address(), 65536);

        let err = compile(&holding("t", 65535, DataType::Uint32), 0).unwrap_err();
        assert!(matches!(err, AcqError::InvalidAddress { .. }));
    }

    #[test]
    fn test_bit_area_requires_bit_type() {
        let tag = TagDeclaration::new("c", 1, Area::Coil, 5, DataType::Uint16);
        assert!(compile(&tag, 0).is_err());

        let tag = TagDeclaration::new("c", 1, Area::DiscreteInput, 5, DataType::Bit);
        let point = compile(&tag, 0).unwrap();
        assert_eq!(point.count, 1);
    }

    #[test]
    fn test_bit_in_register_offset() {
        let point = compile(&holding("b", 3, DataType::Bit).with_bit(15), 0).unwrap();
        assert_eq!(point.options.bit, 15);

        assert!(compile(&holding("b", 3, DataType::Bit).with_bit(16), 0).is_err());
    }

    #[test]
    fn test_string_length_to_registers() {
        let tag = holding("s", 0, DataType::String).with_length(5, StringEncoding::High);
        assert_eq!(compile(&tag, 0).unwrap().count, 3);

        let tag = holding("s", 0, DataType::String).with_length(5, StringEncoding::LowOnly);
        assert_eq!(compile(&tag, 0).unwrap().count, 5);

        let tag = holding("s", 0, DataType::Bytes).with_length(3, StringEncoding::High);
        assert_eq!(compile(&tag, 0).unwrap().count, 2);

        assert!(compile(&holding("s", 0, DataType::String), 0).is_err());
    }

    #[test]
    fn test_tag_byte_order_is_kept() {
        let tag = holding("f", 0, DataType::Float).with_byte_order(ByteOrder::LittleEndian);
        let point = compile(&tag, 0).unwrap();
        assert_eq!(point.options.byte_order, Some(ByteOrder::LittleEndian));
    }

    #[test]
    fn test_compile_all_splits_failures() {
        let tags = vec![
            holding("ok", 1, DataType::Uint16),
            holding("bad", 0, DataType::Uint16),
        ];
        let (points, rejected) = compile_all(&tags, 1);
        assert_eq!(points.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "bad");
    }

    #[test]
    fn test_writability() {
        let coil = compile(&TagDeclaration::new("c", 1, Area::Coil, 0, DataType::Bit), 0).unwrap();
        assert!(is_writable(&coil));

        let input =
            compile(&TagDeclaration::new("i", 1, Area::InputRegister, 0, DataType::Uint16), 0)
                .unwrap();
        assert!(!is_writable(&input));

        let reg_bit = compile(&holding("b", 0, DataType::Bit), 0).unwrap();
        assert!(!is_writable(&reg_bit));
    }
}
