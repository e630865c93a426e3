//! Ordered, typed byte-level field lists.
//!
//! A [`Bitstream`] is the single source of truth for every PSSH box this
//! crate emits: the same field list renders to raw bytes ([`Bitstream::to_bytes`])
//! and to the `<BS/>` bit-field elements of a cryptfile ([`Bitstream::to_xml`]).
//! [`Bitstream::from_xml`] reads those elements back so both forms can be
//! compared byte for byte.
use base64::Engine;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::xml::Element;

/// Bit-field element name.
pub const BS_ELEMENT: &str = "BS";

const ATTR_BITS: &str = "bits";
const ATTR_VALUE: &str = "value";
const ATTR_ENDIAN: &str = "endian";
const ATTR_ID128: &str = "ID128";
const ATTR_FOURCC: &str = "fcc";
const ATTR_DATA: &str = "data";
const ATTR_DATA64: &str = "data64";

// Bit-field forms that exist in the cryptfile syntax but carry no bytes we
// can reproduce here.
const UNSUPPORTED_ATTRS: &[&str] = &["float", "double", "text", "string", "dataFile"];

/// Byte order of an integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// One typed field of a [`Bitstream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Unsigned integer of 8, 16, 24 or 32 bits.
    Integer { value: u32, bits: u8, endian: Endian },
    /// 16-byte identifier (system ID, key ID).
    Id128([u8; 16]),
    /// Four-character code, written verbatim.
    FourCc([u8; 4]),
    /// Opaque bytes, hex in XML.
    Data(Vec<u8>),
    /// Opaque bytes, base64 in XML.
    Data64(Vec<u8>),
}

impl Field {
    /// Number of bytes this field occupies in binary form.
    pub fn byte_len(&self) -> usize {
        match self {
            Field::Integer { bits, .. } => *bits as usize / 8,
            Field::Id128(_) => 16,
            Field::FourCc(_) => 4,
            Field::Data(d) | Field::Data64(d) => d.len(),
        }
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Field::Integer { value, bits, endian } => {
                let width = *bits as usize / 8;
                let mut buf = [0u8; 4];
                match endian {
                    Endian::Big => BigEndian::write_uint(&mut buf, *value as u64, width),
                    Endian::Little => LittleEndian::write_uint(&mut buf, *value as u64, width),
                }
                out.extend_from_slice(&buf[..width]);
            }
            Field::Id128(id) => out.extend_from_slice(id),
            Field::FourCc(fcc) => out.extend_from_slice(fcc),
            Field::Data(d) | Field::Data64(d) => out.extend_from_slice(d),
        }
    }

    /// Render this field as a single `<BS/>` element.
    pub fn to_xml(&self) -> Element {
        let e = Element::new(BS_ELEMENT);
        match self {
            Field::Integer { value, bits, endian } => {
                let e = e
                    .with_attr(ATTR_BITS, bits.to_string())
                    .with_attr(ATTR_VALUE, value.to_string());
                match endian {
                    Endian::Big => e,
                    Endian::Little => e.with_attr(ATTR_ENDIAN, "little"),
                }
            }
            Field::Id128(id) => e.with_attr(ATTR_ID128, hex::encode(id)),
            // FourCCs are validated as ASCII on append.
            Field::FourCc(fcc) => e.with_attr(ATTR_FOURCC, String::from_utf8_lossy(fcc)),
            Field::Data(d) => e.with_attr(ATTR_DATA, hex::encode(d)),
            Field::Data64(d) => {
                e.with_attr(ATTR_DATA64, base64::engine::general_purpose::STANDARD.encode(d))
            }
        }
    }

    /// Interpret a `<BS/>` element as a field.
    pub fn from_xml(element: &Element) -> Result<Self> {
        if element.name() != BS_ELEMENT {
            return Err(Error::InvalidField(format!(
                "Expected <{}> element, got <{}>",
                BS_ELEMENT,
                element.name()
            )));
        }

        if let Some(bits) = element.attr(ATTR_BITS) {
            let bits: u8 = bits
                .trim()
                .parse()
                .map_err(|_| Error::InvalidField(format!("Invalid bit width: {}", bits)))?;
            let value = element
                .attr(ATTR_VALUE)
                .ok_or_else(|| Error::InvalidField("Integer field without value".to_string()))?;
            let value = parse_integer(value)?;
            let endian = match element.attr(ATTR_ENDIAN) {
                None | Some("big") => Endian::Big,
                Some("little") => Endian::Little,
                Some(other) => {
                    return Err(Error::InvalidField(format!("Invalid endianness: {}", other)))
                }
            };
            return integer_field(value, bits, endian);
        }

        if let Some(id) = element.attr(ATTR_ID128) {
            let bytes = decode_hex(id)?;
            return id128_field(&bytes);
        }

        if let Some(fcc) = element.attr(ATTR_FOURCC) {
            return fourcc_field(fcc);
        }

        if let Some(data) = element.attr(ATTR_DATA) {
            return Ok(Field::Data(decode_hex(data)?));
        }

        if let Some(data) = element.attr(ATTR_DATA64) {
            let bytes = base64::engine::general_purpose::STANDARD.decode(data.trim())?;
            return Ok(Field::Data64(bytes));
        }

        if let Some(attr) = UNSUPPORTED_ATTRS.iter().find(|a| element.attr(a).is_some()) {
            return Err(Error::UnsupportedOperation(format!(
                "Bit-field form '{}' cannot be rendered as bytes",
                attr
            )));
        }

        Err(Error::InvalidField(
            "Bit-field element has no recognised attribute".to_string(),
        ))
    }
}

/// An ordered list of typed fields with two equivalent renderings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitstream {
    fields: Vec<Field>,
}

impl Bitstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a big-endian integer of `bits` width (8, 16, 24 or 32).
    pub fn append_integer(&mut self, value: u64, bits: u8) -> Result<&mut Self> {
        self.fields.push(integer_field(value, bits, Endian::Big)?);
        Ok(self)
    }

    /// Append a little-endian integer of `bits` width (8, 16, 24 or 32).
    pub fn append_integer_le(&mut self, value: u64, bits: u8) -> Result<&mut Self> {
        self.fields.push(integer_field(value, bits, Endian::Little)?);
        Ok(self)
    }

    /// Append a 16-byte identifier.
    pub fn append_id128(&mut self, id: &[u8]) -> Result<&mut Self> {
        self.fields.push(id128_field(id)?);
        Ok(self)
    }

    /// Append a four-character code such as `pssh`.
    pub fn append_fourcc(&mut self, fcc: &str) -> Result<&mut Self> {
        self.fields.push(fourcc_field(fcc)?);
        Ok(self)
    }

    /// Append opaque bytes rendered as hex in XML.
    pub fn append_data(&mut self, data: &[u8]) -> &mut Self {
        self.fields.push(Field::Data(data.to_vec()));
        self
    }

    /// Append opaque bytes rendered as base64 in XML.
    pub fn append_data64(&mut self, data: &[u8]) -> &mut Self {
        self.fields.push(Field::Data64(data.to_vec()));
        self
    }

    /// Append every field of `other`, in order.
    pub fn extend(&mut self, other: Bitstream) -> &mut Self {
        self.fields.extend(other.fields);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Total byte length of the binary rendering.
    pub fn byte_len(&self) -> usize {
        self.fields.iter().map(Field::byte_len).sum()
    }

    /// Render all fields as one contiguous buffer, in field order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        for field in self.fields.iter() {
            field.write_bytes(&mut out);
        }
        out
    }

    /// Render all fields as `<BS/>` elements, one per field.
    pub fn to_xml(&self) -> Vec<Element> {
        self.fields.iter().map(Field::to_xml).collect()
    }

    /// Append the `<BS/>` rendering of every field to `parent`.
    pub fn append_xml_to(&self, parent: &mut Element) {
        for element in self.to_xml() {
            parent.push_child(element);
        }
    }

    /// Rebuild a bitstream from `<BS/>` elements.
    pub fn from_xml<'a, I>(elements: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Element>,
    {
        let fields = elements
            .into_iter()
            .map(Field::from_xml)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fields })
    }
}

fn integer_field(value: u64, bits: u8, endian: Endian) -> Result<Field> {
    if !matches!(bits, 8 | 16 | 24 | 32) {
        return Err(Error::InvalidField(format!(
            "Unsupported integer width: {} bits",
            bits
        )));
    }
    if value >> bits != 0 {
        return Err(Error::InvalidField(format!(
            "Value {} does not fit in {} bits",
            value, bits
        )));
    }
    Ok(Field::Integer {
        value: value as u32,
        bits,
        endian,
    })
}

fn id128_field(id: &[u8]) -> Result<Field> {
    let id: [u8; 16] = id.try_into().map_err(|_| {
        Error::InvalidField(format!("128-bit identifier must be 16 bytes, got {}", id.len()))
    })?;
    Ok(Field::Id128(id))
}

fn fourcc_field(fcc: &str) -> Result<Field> {
    let bytes: [u8; 4] = fcc
        .as_bytes()
        .try_into()
        .map_err(|_| Error::InvalidField(format!("Four-character code must be 4 bytes: {:?}", fcc)))?;
    if !bytes.is_ascii() {
        return Err(Error::InvalidField(format!(
            "Four-character code must be ASCII: {:?}",
            fcc
        )));
    }
    Ok(Field::FourCc(bytes))
}

fn parse_integer(text: &str) -> Result<u64> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|_| Error::InvalidField(format!("Invalid integer value: {}", text)))
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let digits: String = digits.chars().filter(|c| *c != '-').collect();
    Ok(hex::decode(digits)?)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{Bitstream, Endian, Field};
    use crate::error::Error;
    use crate::xml::Element;

    fn random_bitstream(rng: &mut StdRng) -> Bitstream {
        let mut bs = Bitstream::new();
        let count = rng.random_range(0..12);
        for _ in 0..count {
            match rng.random_range(0..6) {
                0 | 1 => {
                    let bits = [8u8, 16, 24, 32][rng.random_range(0..4)];
                    let value = rng.random::<u64>() & ((1u64 << bits) - 1);
                    if rng.random_bool(0.5) {
                        bs.append_integer(value, bits).expect("integer");
                    } else {
                        bs.append_integer_le(value, bits).expect("integer le");
                    }
                }
                2 => {
                    bs.append_id128(&rng.random::<[u8; 16]>()).expect("id128");
                }
                3 => {
                    let fcc: String = (0..4)
                        .map(|_| rng.random_range(b'a'..=b'z') as char)
                        .collect();
                    bs.append_fourcc(&fcc).expect("fourcc");
                }
                4 => {
                    let len = rng.random_range(0..40);
                    let data: Vec<u8> = (0..len).map(|_| rng.random()).collect();
                    bs.append_data(&data);
                }
                _ => {
                    let len = rng.random_range(0..40);
                    let data: Vec<u8> = (0..len).map(|_| rng.random()).collect();
                    bs.append_data64(&data);
                }
            }
        }
        bs
    }

    #[test]
    fn xml_and_binary_renderings_agree() {
        let mut rng = StdRng::seed_from_u64(0x5053_5348);
        for _ in 0..256 {
            let bs = random_bitstream(&mut rng);
            let bytes = bs.to_bytes();
            assert_eq!(bytes.len(), bs.byte_len());

            let xml = bs.to_xml();
            let reread = Bitstream::from_xml(&xml).expect("reread");
            assert_eq!(reread.to_bytes(), bytes);
        }
    }

    #[test]
    fn xml_survives_text_serialization() {
        let mut rng = StdRng::seed_from_u64(7);
        let bs = random_bitstream(&mut rng);
        let mut parent = Element::new("DRMInfo");
        bs.append_xml_to(&mut parent);

        let text = parent.to_xml_string().expect("serialize");
        let parsed = Element::parse(&text).expect("parse");
        let reread = Bitstream::from_xml(parsed.children()).expect("reread");
        assert_eq!(reread.to_bytes(), bs.to_bytes());
    }

    #[test]
    fn integer_endianness() {
        let mut bs = Bitstream::new();
        bs.append_integer(0x0102_0304, 32)
            .expect("be32")
            .append_integer_le(0x0102_0304, 32)
            .expect("le32")
            .append_integer(0x0a0b0c, 24)
            .expect("be24")
            .append_integer_le(0x0a0b0c, 24)
            .expect("le24")
            .append_integer_le(0x0102, 16)
            .expect("le16");
        assert_eq!(
            bs.to_bytes(),
            vec![1, 2, 3, 4, 4, 3, 2, 1, 0x0a, 0x0b, 0x0c, 0x0c, 0x0b, 0x0a, 0x02, 0x01]
        );
    }

    #[test]
    fn integer_out_of_range_is_rejected() {
        let mut bs = Bitstream::new();
        assert!(matches!(
            bs.append_integer(256, 8),
            Err(Error::InvalidField(_))
        ));
        assert!(matches!(
            bs.append_integer_le(0x1_0000, 16),
            Err(Error::InvalidField(_))
        ));
        assert!(matches!(
            bs.append_integer(1u64 << 32, 32),
            Err(Error::InvalidField(_))
        ));
        assert!(matches!(bs.append_integer(1, 12), Err(Error::InvalidField(_))));
        assert!(bs.append_integer(0xff_ffff, 24).is_ok());
        assert_eq!(bs.fields().len(), 1);
    }

    #[test]
    fn id128_requires_sixteen_bytes() {
        let mut bs = Bitstream::new();
        assert!(matches!(bs.append_id128(&[0u8; 15]), Err(Error::InvalidField(_))));
        assert!(matches!(bs.append_id128(&[0u8; 17]), Err(Error::InvalidField(_))));
        assert!(bs.append_id128(&[0u8; 16]).is_ok());
    }

    #[test]
    fn fourcc_requires_four_ascii_bytes() {
        let mut bs = Bitstream::new();
        assert!(bs.append_fourcc("pss").is_err());
        assert!(bs.append_fourcc("psshh").is_err());
        bs.append_fourcc("amet").expect("fourcc");
        assert_eq!(bs.to_bytes(), b"amet".to_vec());
    }

    #[test]
    fn xml_attributes_describe_fields() {
        let mut bs = Bitstream::new();
        bs.append_integer_le(6, 16).expect("le16");
        bs.append_id128(&[0xab; 16]).expect("id");
        bs.append_data64(b"hi");
        let xml = bs.to_xml();

        assert_eq!(xml[0].attr("bits"), Some("16"));
        assert_eq!(xml[0].attr("value"), Some("6"));
        assert_eq!(xml[0].attr("endian"), Some("little"));
        assert_eq!(xml[1].attr("ID128"), Some("abababababababababababababababab"));
        assert_eq!(xml[2].attr("data64"), Some("aGk="));
    }

    #[test]
    fn from_xml_accepts_hex_values_and_prefixed_ids() {
        let value = Element::new("BS").with_attr("bits", "8").with_attr("value", "0x7f");
        assert_eq!(
            Field::from_xml(&value).expect("hex value"),
            Field::Integer {
                value: 0x7f,
                bits: 8,
                endian: Endian::Big
            }
        );

        let id = Element::new("BS").with_attr("ID128", "0x1077efec-c0b2-4d02-ace3-3c1e52e2fb4b");
        assert!(matches!(Field::from_xml(&id), Ok(Field::Id128(_))));
    }

    #[test]
    fn from_xml_rejects_unknown_forms() {
        let float = Element::new("BS").with_attr("float", "1.5");
        assert!(matches!(
            Field::from_xml(&float),
            Err(Error::UnsupportedOperation(_))
        ));

        let empty = Element::new("BS");
        assert!(matches!(Field::from_xml(&empty), Err(Error::InvalidField(_))));

        let other = Element::new("key").with_attr("bits", "8").with_attr("value", "1");
        assert!(matches!(Field::from_xml(&other), Err(Error::InvalidField(_))));
    }
}
