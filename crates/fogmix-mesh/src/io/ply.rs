//! Stanford PLY reader (ASCII and binary little-endian) and ASCII writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use super::{parse_err, push_ngon, read_err, write_err};
use crate::error::{MeshError, MeshResult};
use crate::{Mesh, Vertex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => ScalarType::I8,
            "uchar" | "uint8" => ScalarType::U8,
            "short" | "int16" => ScalarType::I16,
            "ushort" | "uint16" => ScalarType::U16,
            "int" | "int32" => ScalarType::I32,
            "uint" | "uint32" => ScalarType::U32,
            "float" | "float32" => ScalarType::F32,
            "double" | "float64" => ScalarType::F64,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    fn decode_le(self, b: &[u8]) -> f64 {
        match self {
            ScalarType::I8 => b[0] as i8 as f64,
            ScalarType::U8 => b[0] as f64,
            ScalarType::I16 => i16::from_le_bytes([b[0], b[1]]) as f64,
            ScalarType::U16 => u16::from_le_bytes([b[0], b[1]]) as f64,
            ScalarType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            ScalarType::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            ScalarType::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            ScalarType::F64 => {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: ScalarType },
    List { name: String, count: ScalarType, item: ScalarType },
}

impl Property {
    fn name(&self) -> &str {
        match self {
            Property::Scalar { name, .. } | Property::List { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

#[derive(Debug)]
struct Header {
    encoding: Encoding,
    elements: Vec<Element>,
    /// Byte offset of the first body byte.
    body_start: usize,
}

fn parse_header(bytes: &[u8], path: &Path) -> MeshResult<Header> {
    const END: &[u8] = b"end_header";
    let end = bytes
        .windows(END.len())
        .position(|w| w == END)
        .ok_or_else(|| parse_err(path, "missing end_header"))?;
    let mut body_start = end + END.len();
    if bytes.get(body_start) == Some(&b'\r') {
        body_start += 1;
    }
    if bytes.get(body_start) == Some(&b'\n') {
        body_start += 1;
    }

    let text = std::str::from_utf8(&bytes[..end])
        .map_err(|_| parse_err(path, "header is not valid UTF-8"))?;
    let mut lines = text.lines().map(str::trim);

    if lines.next() != Some("ply") {
        return Err(parse_err(path, "missing 'ply' magic"));
    }

    let mut encoding = None;
    let mut elements: Vec<Element> = Vec::new();

    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] | ["comment", ..] | ["obj_info", ..] => {}
            ["format", "ascii", _] => encoding = Some(Encoding::Ascii),
            ["format", "binary_little_endian", _] => {
                encoding = Some(Encoding::BinaryLittleEndian)
            }
            ["format", other, _] => {
                return Err(parse_err(path, format!("unsupported PLY encoding '{}'", other)))
            }
            ["element", name, count] => {
                let count = count
                    .parse()
                    .map_err(|_| parse_err(path, format!("bad element count '{}'", count)))?;
                elements.push(Element {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            ["property", "list", count, item, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| parse_err(path, "property before element"))?;
                let (Some(count), Some(item)) = (ScalarType::parse(count), ScalarType::parse(item))
                else {
                    return Err(parse_err(path, format!("bad list property '{}'", line)));
                };
                element.properties.push(Property::List {
                    name: name.to_string(),
                    count,
                    item,
                });
            }
            ["property", ty, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| parse_err(path, "property before element"))?;
                let ty = ScalarType::parse(ty)
                    .ok_or_else(|| parse_err(path, format!("bad property type '{}'", ty)))?;
                element.properties.push(Property::Scalar {
                    name: name.to_string(),
                    ty,
                });
            }
            _ => return Err(parse_err(path, format!("unrecognized header line '{}'", line))),
        }
    }

    Ok(Header {
        encoding: encoding.ok_or_else(|| parse_err(path, "missing format line"))?,
        elements,
        body_start,
    })
}

/// One decoded element row: scalar values and lists, in property order.
enum Value {
    Scalar(f64),
    List(Vec<f64>),
}

/// Sequential reader over either encoding.
struct Body<'a> {
    encoding: Encoding,
    bytes: &'a [u8],
    pos: usize,
    tokens: std::str::SplitAsciiWhitespace<'a>,
}

impl<'a> Body<'a> {
    fn new(header: &Header, bytes: &'a [u8], path: &Path) -> MeshResult<Self> {
        let body = &bytes[header.body_start..];
        let text = match header.encoding {
            Encoding::Ascii => std::str::from_utf8(body)
                .map_err(|_| parse_err(path, "ASCII body is not valid UTF-8"))?,
            Encoding::BinaryLittleEndian => "",
        };
        Ok(Self {
            encoding: header.encoding,
            bytes: body,
            pos: 0,
            tokens: text.split_ascii_whitespace(),
        })
    }

    fn scalar(&mut self, ty: ScalarType) -> Option<f64> {
        match self.encoding {
            Encoding::Ascii => self.tokens.next()?.parse().ok(),
            Encoding::BinaryLittleEndian => {
                let end = self.pos + ty.size();
                let chunk = self.bytes.get(self.pos..end)?;
                self.pos = end;
                Some(ty.decode_le(chunk))
            }
        }
    }

    /// Upper bound on the rows of `properties` the unread body can still hold.
    /// Every property takes at least one byte in either encoding.
    fn max_rows(&self, properties: &[Property]) -> usize {
        let left = match self.encoding {
            Encoding::Ascii => self.bytes.len(),
            Encoding::BinaryLittleEndian => self.bytes.len().saturating_sub(self.pos),
        };
        left / properties.len().max(1)
    }

    fn row(&mut self, properties: &[Property]) -> Option<Vec<Value>> {
        properties
            .iter()
            .map(|prop| match prop {
                Property::Scalar { ty, .. } => self.scalar(*ty).map(Value::Scalar),
                Property::List { count, item, .. } => {
                    let n = self.scalar(*count)? as usize;
                    (0..n)
                        .map(|_| self.scalar(*item))
                        .collect::<Option<Vec<_>>>()
                        .map(Value::List)
                }
            })
            .collect()
    }
}

/// Load mesh from a PLY file.
pub fn load_ply(path: &Path) -> MeshResult<Mesh> {
    let bytes = std::fs::read(path).map_err(read_err(path))?;
    let header = parse_header(&bytes, path)?;
    let mut body = Body::new(&header, &bytes, path)?;

    debug!(
        "PLY {:?}: {} elements",
        header.encoding,
        header.elements.len()
    );

    let mut mesh = Mesh::new();
    let truncated = || parse_err(path, "unexpected end of PLY body");

    for element in &header.elements {
        let position_of = |name: &str| element.properties.iter().position(|p| p.name() == name);

        match element.name.as_str() {
            "vertex" => {
                let (Some(ix), Some(iy), Some(iz)) =
                    (position_of("x"), position_of("y"), position_of("z"))
                else {
                    return Err(parse_err(path, "vertex element lacks x/y/z"));
                };
                mesh.vertices
                    .reserve(element.count.min(body.max_rows(&element.properties)));
                for _ in 0..element.count {
                    let row = body.row(&element.properties).ok_or_else(truncated)?;
                    let coord = |i: usize| match row[i] {
                        Value::Scalar(v) => Ok(v),
                        Value::List(_) => Err(parse_err(path, "vertex coordinate is a list")),
                    };
                    mesh.vertices
                        .push(Vertex::from_coords(coord(ix)?, coord(iy)?, coord(iz)?));
                }
            }
            "face" => {
                let list_idx = position_of("vertex_indices")
                    .or_else(|| position_of("vertex_index"))
                    .ok_or_else(|| parse_err(path, "face element lacks vertex_indices"))?;
                mesh.polygons
                    .reserve(element.count.min(body.max_rows(&element.properties)));
                let mut corners = Vec::with_capacity(4);
                for face in 0..element.count {
                    let row = body.row(&element.properties).ok_or_else(truncated)?;
                    let Value::List(ref items) = row[list_idx] else {
                        return Err(parse_err(path, "vertex_indices is not a list"));
                    };
                    corners.clear();
                    for &v in items {
                        if v < 0.0 || v > u32::MAX as f64 {
                            return Err(MeshError::IndexOutOfRange {
                                polygon: face,
                                index: u32::MAX,
                                vertex_count: mesh.vertices.len(),
                            });
                        }
                        corners.push(v as u32);
                    }
                    if !push_ngon(&mut mesh, &corners) {
                        return Err(parse_err(
                            path,
                            format!("face {} has {} corners", face, corners.len()),
                        ));
                    }
                }
            }
            _ => {
                // Skip unknown elements row by row so later elements stay aligned.
                for _ in 0..element.count {
                    body.row(&element.properties).ok_or_else(truncated)?;
                }
            }
        }
    }

    debug!(
        "PLY loaded: {} vertices, {} polygons",
        mesh.vertices.len(),
        mesh.polygons.len()
    );

    Ok(mesh)
}

/// Save mesh to an ASCII PLY file. Quads are kept.
pub fn save_ply(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    info!("Saving mesh to {:?} (PLY format)", path);

    let file = File::create(path).map_err(write_err(path))?;
    let mut writer = BufWriter::new(file);
    write_ply(mesh, &mut writer).map_err(write_err(path))?;
    writer.flush().map_err(write_err(path))?;

    info!(
        "Saved {} vertices and {} polygons to {:?}",
        mesh.vertices.len(),
        mesh.polygons.len(),
        path
    );

    Ok(())
}

fn write_ply(mesh: &Mesh, w: &mut impl Write) -> std::io::Result<()> {
    let has_normals = !mesh.vertices.is_empty() && mesh.vertices.iter().all(|v| v.normal.is_some());

    writeln!(w, "ply")?;
    writeln!(w, "format ascii 1.0")?;
    writeln!(w, "comment exported by fogmix")?;
    writeln!(w, "element vertex {}", mesh.vertices.len())?;
    writeln!(w, "property double x")?;
    writeln!(w, "property double y")?;
    writeln!(w, "property double z")?;
    if has_normals {
        writeln!(w, "property float nx")?;
        writeln!(w, "property float ny")?;
        writeln!(w, "property float nz")?;
    }
    writeln!(w, "element face {}", mesh.polygons.len())?;
    writeln!(w, "property list uchar int vertex_indices")?;
    writeln!(w, "end_header")?;

    for v in &mesh.vertices {
        let p = v.position;
        match v.normal {
            Some(n) if has_normals => {
                writeln!(w, "{} {} {} {:.6} {:.6} {:.6}", p.x, p.y, p.z, n.x, n.y, n.z)?
            }
            _ => writeln!(w, "{} {} {}", p.x, p.y, p.z)?,
        }
    }

    for poly in &mesh.polygons {
        let idx = poly.indices();
        write!(w, "{}", idx.len())?;
        for i in idx {
            write!(w, " {}", i)?;
        }
        writeln!(w)?;
    }

    Ok(())
}
