//! Value rendering.
//!
//! The whole value is read before anything is rendered, so a failed read
//! produces an error and never a half-printed aggregate.

use std::fmt::Write as _;

use gimli::RunTimeEndian;

use super::resolve::LiveVariable;
use crate::error::{FathomError, FathomResult};
use crate::layout::{LayoutIndex, ScalarEncoding, TypeId, TypeKind};
use crate::memory::{decode_signed, decode_unsigned, MemoryReader};

/// Arrays longer than this are elided after the first elements.
const MAX_ARRAY_ELEMENTS: u64 = 64;
const MAX_NESTING: usize = 32;

/// Renders live values as C-like text
pub struct ValueFormatter<'a, M: MemoryReader + ?Sized>
{
    index: &'a LayoutIndex,
    memory: &'a M,
}

impl<'a, M: MemoryReader + ?Sized> ValueFormatter<'a, M>
{
    /// Create a formatter over a layout index and target memory
    pub fn new(index: &'a LayoutIndex, memory: &'a M) -> Self
    {
        Self { index, memory }
    }

    /// Read and render the value of `variable`
    ///
    /// ## Errors
    ///
    /// - `InvalidDebugInfo`: the type has no known size
    /// - `MemoryRead`: the value's bytes can't be read
    pub fn format(&self, variable: &LiveVariable) -> FathomResult<String>
    {
        let graph = self.index.graph();
        let size = graph.size_of(variable.ty).ok_or_else(|| {
            FathomError::InvalidDebugInfo(format!("type {} has no size", graph.display_name(variable.ty)))
        })?;
        let length = usize::try_from(size)
            .map_err(|_| FathomError::InvalidArgument(format!("value of {size} bytes is too large to read")))?;
        let bytes = self.memory.read_memory(variable.address, length)?;

        let mut out = String::new();
        self.render(variable.ty, &bytes, self.memory.endian(), 0, &mut out)?;
        Ok(out)
    }

    fn render(&self, ty: TypeId, bytes: &[u8], endian: RunTimeEndian, depth: usize, out: &mut String) -> FathomResult<()>
    {
        if depth > MAX_NESTING {
            out.push_str("...");
            return Ok(());
        }

        let graph = self.index.graph();
        let peeled = graph.peel(ty)?;
        let descriptor = graph.get(peeled);
        match descriptor.kind {
            TypeKind::Scalar(encoding) => render_scalar(encoding, bytes, endian, out),
            TypeKind::Pointer(_) => {
                let value = decode_unsigned(bytes, endian).ok_or_else(|| malformed(graph.display_name(ty), bytes.len()))?;
                let _ = write!(out, "0x{value:016x}");
                Ok(())
            }
            TypeKind::Struct | TypeKind::Union => {
                if descriptor.fields.is_empty() {
                    out.push_str("{}");
                    return Ok(());
                }
                out.push_str("{ ");
                for (position, field) in descriptor.fields.iter().enumerate() {
                    if position > 0 {
                        out.push_str(", ");
                    }
                    if let Some(name) = &field.name {
                        let _ = write!(out, "{name} = ");
                    }
                    let slice = self.slice(bytes, field.offset, field.ty)?;
                    self.render(field.ty, slice, endian, depth + 1, out)?;
                }
                out.push_str(" }");
                Ok(())
            }
            TypeKind::Array { element, count } => {
                let count = count.unwrap_or(0);
                let stride = graph.size_of(element).unwrap_or(0);
                if count == 0 || stride == 0 {
                    out.push_str("{}");
                    return Ok(());
                }
                out.push_str("{ ");
                for position in 0..count.min(MAX_ARRAY_ELEMENTS) {
                    if position > 0 {
                        out.push_str(", ");
                    }
                    let slice = self.slice(bytes, position * stride, element)?;
                    self.render(element, slice, endian, depth + 1, out)?;
                }
                if count > MAX_ARRAY_ELEMENTS {
                    out.push_str(", ...");
                }
                out.push_str(" }");
                Ok(())
            }
            TypeKind::Void => Err(FathomError::InvalidExpression {
                expression: graph.display_name(ty),
                reason: "value has void type".to_string(),
            }),
            TypeKind::Typedef(_) | TypeKind::Const(_) | TypeKind::Volatile(_) => {
                unreachable!("peel strips aliases and qualifiers")
            }
        }
    }

    fn slice<'b>(&self, bytes: &'b [u8], offset: u64, ty: TypeId) -> FathomResult<&'b [u8]>
    {
        let graph = self.index.graph();
        let size = graph.size_of(ty).unwrap_or(0);
        let start = usize::try_from(offset).ok();
        let end = start.and_then(|start| start.checked_add(usize::try_from(size).ok()?));
        match (start, end) {
            (Some(start), Some(end)) if end <= bytes.len() => Ok(&bytes[start..end]),
            _ => Err(FathomError::InvalidDebugInfo(format!(
                "member of type {} at offset {offset} lies outside its {}-byte parent",
                graph.display_name(ty),
                bytes.len()
            ))),
        }
    }
}

/// Read and render `variable` in one call
///
/// ## Errors
///
/// See [`ValueFormatter::format`].
pub fn format_value<M: MemoryReader + ?Sized>(
    index: &LayoutIndex,
    memory: &M,
    variable: &LiveVariable,
) -> FathomResult<String>
{
    ValueFormatter::new(index, memory).format(variable)
}

fn malformed(type_name: String, length: usize) -> FathomError
{
    FathomError::InvalidDebugInfo(format!("cannot decode {length}-byte value of type {type_name}"))
}

fn render_scalar(encoding: ScalarEncoding, bytes: &[u8], endian: RunTimeEndian, out: &mut String) -> FathomResult<()>
{
    let unsupported = || malformed(format!("{encoding:?}").to_lowercase(), bytes.len());
    match encoding {
        ScalarEncoding::Signed => {
            let value = decode_signed(bytes, endian).ok_or_else(unsupported)?;
            let _ = write!(out, "{value}");
        }
        ScalarEncoding::Unsigned => {
            let value = decode_unsigned(bytes, endian).ok_or_else(unsupported)?;
            let _ = write!(out, "{value}");
        }
        ScalarEncoding::Bool => {
            let value = decode_unsigned(bytes, endian).ok_or_else(unsupported)?;
            out.push_str(if value == 0 { "false" } else { "true" });
        }
        ScalarEncoding::SignedChar | ScalarEncoding::UnsignedChar => {
            let [byte] = bytes else {
                return Err(unsupported());
            };
            match *byte {
                b'\'' => out.push_str("'\\''"),
                b'\\' => out.push_str("'\\\\'"),
                b'\n' => out.push_str("'\\n'"),
                b'\t' => out.push_str("'\\t'"),
                0 => out.push_str("'\\0'"),
                printable if printable.is_ascii_graphic() || printable == b' ' => {
                    let _ = write!(out, "'{}'", printable as char);
                }
                other => {
                    let _ = write!(out, "'\\x{other:02x}'");
                }
            }
        }
        ScalarEncoding::Float => match bytes.len() {
            4 => {
                let bits = decode_unsigned(bytes, endian).ok_or_else(unsupported)?;
                let _ = write!(out, "{}", f32::from_bits(bits as u32));
            }
            8 => {
                let bits = decode_unsigned(bytes, endian).ok_or_else(unsupported)?;
                let _ = write!(out, "{}", f64::from_bits(bits));
            }
            _ => return Err(unsupported()),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn scalar(encoding: ScalarEncoding, bytes: &[u8]) -> String
    {
        let mut out = String::new();
        render_scalar(encoding, bytes, RunTimeEndian::Little, &mut out).unwrap();
        out
    }

    #[test]
    fn test_render_integers()
    {
        assert_eq!(scalar(ScalarEncoding::Signed, &[0xfc, 0xff, 0xff, 0xff]), "-4");
        assert_eq!(scalar(ScalarEncoding::Unsigned, &[0xfc, 0xff, 0xff, 0xff]), "4294967292");
        assert_eq!(scalar(ScalarEncoding::Signed, &[2, 0]), "2");
    }

    #[test]
    fn test_render_chars_and_bools()
    {
        assert_eq!(scalar(ScalarEncoding::SignedChar, b"a"), "'a'");
        assert_eq!(scalar(ScalarEncoding::SignedChar, &[1]), "'\\x01'");
        assert_eq!(scalar(ScalarEncoding::UnsignedChar, &[0]), "'\\0'");
        assert_eq!(scalar(ScalarEncoding::Bool, &[1]), "true");
        assert_eq!(scalar(ScalarEncoding::Bool, &[0]), "false");
    }

    #[test]
    fn test_render_floats()
    {
        assert_eq!(scalar(ScalarEncoding::Float, &1.5f32.to_le_bytes()), "1.5");
        assert_eq!(scalar(ScalarEncoding::Float, &(-0.25f64).to_le_bytes()), "-0.25");
    }

    #[test]
    fn test_render_odd_sized_integer_fails()
    {
        let mut out = String::new();
        assert!(render_scalar(ScalarEncoding::Signed, &[0, 0, 0], RunTimeEndian::Little, &mut out).is_err());
    }
}
