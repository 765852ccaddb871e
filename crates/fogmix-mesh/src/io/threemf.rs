//! 3MF reading and writing.
//!
//! 3MF is a ZIP archive containing XML files. The mesh data lives in
//! `3D/3dmodel.model` as indexed vertices and triangles.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info};

use super::{parse_err, read_err, write_err};
use crate::error::MeshResult;
use crate::{Mesh, Polygon, Vertex};

/// Load mesh from a 3MF file. Every object in the model is merged.
pub fn load_3mf(path: &Path) -> MeshResult<Mesh> {
    let file = File::open(path).map_err(read_err(path))?;

    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| parse_err(path, format!("invalid 3MF archive: {}", e)))?;

    let model_path = find_model_path(&mut archive)
        .ok_or_else(|| parse_err(path, "no model file found in 3MF archive"))?;

    let mut model_file = archive
        .by_name(&model_path)
        .map_err(|e| parse_err(path, format!("cannot open '{}': {}", model_path, e)))?;

    let mut xml_content = String::new();
    model_file
        .read_to_string(&mut xml_content)
        .map_err(read_err(path))?;

    parse_model(&xml_content, path)
}

fn find_model_path<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> Option<String> {
    let candidates = ["3D/3dmodel.model", "3d/3dmodel.model", "3D/3DModel.model"];
    for candidate in candidates {
        if archive.by_name(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }

    archive
        .file_names()
        .find(|name| name.to_lowercase().ends_with(".model"))
        .map(String::from)
}

fn attr<T: std::str::FromStr>(e: &BytesStart<'_>, key: &[u8], path: &Path) -> MeshResult<T> {
    let found = e
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .ok_or_else(|| {
            parse_err(
                path,
                format!("missing attribute '{}'", String::from_utf8_lossy(key)),
            )
        })?;
    let value = String::from_utf8_lossy(&found.value);
    value
        .trim()
        .parse()
        .map_err(|_| parse_err(path, format!("bad attribute value '{}'", value)))
}

fn parse_model(xml: &str, path: &Path) -> MeshResult<Mesh> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut mesh = Mesh::new();
    let mut in_vertices = false;
    let mut in_triangles = false;
    // Triangle indices are local to each <mesh>.
    let mut object_offset = 0u32;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"mesh" => object_offset = mesh.vertices.len() as u32,
                b"vertices" => in_vertices = true,
                b"triangles" => in_triangles = true,
                b"vertex" if in_vertices => {
                    mesh.vertices.push(Vertex::from_coords(
                        attr(e, b"x", path)?,
                        attr(e, b"y", path)?,
                        attr(e, b"z", path)?,
                    ));
                }
                b"triangle" if in_triangles => {
                    let v1: u32 = attr(e, b"v1", path)?;
                    let v2: u32 = attr(e, b"v2", path)?;
                    let v3: u32 = attr(e, b"v3", path)?;
                    mesh.polygons.push(Polygon::Triangle([
                        v1 + object_offset,
                        v2 + object_offset,
                        v3 + object_offset,
                    ]));
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"vertices" => in_vertices = false,
                b"triangles" => in_triangles = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_err(path, format!("XML parse error: {}", e))),
            _ => {}
        }
    }

    debug!(
        "3MF loaded: {} vertices, {} triangles",
        mesh.vertices.len(),
        mesh.polygons.len()
    );

    Ok(mesh)
}

/// Save mesh to a 3MF file. Quads are split into triangles.
pub fn save_3mf(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    info!("Saving mesh to {:?} (3MF format)", path);

    let file = File::create(path).map_err(write_err(path))?;
    let zip_err = |e: zip::result::ZipError| write_err(path)(std::io::Error::other(e.to_string()));

    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, contents) in [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", RELS_XML.to_string()),
        ("3D/3dmodel.model", model_xml(mesh)),
    ] {
        zip.start_file(name, options).map_err(zip_err)?;
        zip.write_all(contents.as_bytes()).map_err(write_err(path))?;
    }

    zip.finish().map_err(zip_err)?;

    info!(
        "Saved {} vertices and {} triangles to {:?} (3MF)",
        mesh.vertices.len(),
        mesh.triangle_count(),
        path
    );

    Ok(())
}

fn model_xml(mesh: &Mesh) -> String {
    use std::fmt::Write as _;

    let mut xml = String::with_capacity(mesh.vertices.len() * 60 + mesh.polygons.len() * 50);

    xml.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<model unit="millimeter" xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02">
  <resources>
    <object id="1" type="model">
      <mesh>
        <vertices>
"#,
    );

    for v in &mesh.vertices {
        let _ = writeln!(
            xml,
            "          <vertex x=\"{}\" y=\"{}\" z=\"{}\"/>",
            v.position.x, v.position.y, v.position.z
        );
    }

    xml.push_str("        </vertices>\n        <triangles>\n");

    for [a, b, c] in mesh.triangle_indices() {
        let _ = writeln!(
            xml,
            "          <triangle v1=\"{}\" v2=\"{}\" v3=\"{}\"/>",
            a, b, c
        );
    }

    xml.push_str(
        r#"        </triangles>
      </mesh>
    </object>
  </resources>
  <build>
    <item objectid="1"/>
  </build>
</model>
"#,
    );

    xml
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="model" ContentType="application/vnd.ms-package.3dmanufacturing-3dmodel+xml"/>
</Types>
"#;

const RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Target="/3D/3dmodel.model" Id="rel0" Type="http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel"/>
</Relationships>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use tempfile::NamedTempFile;

    #[test]
    fn test_round_trip_triangulates_quads() {
        let mesh = Mesh::cuboid(Point3::origin(), Point3::new(1.0, 2.0, 3.0));
        let file = NamedTempFile::with_suffix(".3mf").unwrap();
        save_3mf(&mesh, file.path()).unwrap();

        let reloaded = load_3mf(file.path()).unwrap();
        assert_eq!(reloaded.vertex_count(), 8);
        assert_eq!(reloaded.polygon_count(), 12);
        assert!((reloaded.volume() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_second_object_indices_are_offset() {
        let xml = r#"<model><resources>
            <object id="1"><mesh>
              <vertices><vertex x="0" y="0" z="0"/><vertex x="1" y="0" z="0"/><vertex x="0" y="1" z="0"/></vertices>
              <triangles><triangle v1="0" v2="1" v3="2"/></triangles>
            </mesh></object>
            <object id="2"><mesh>
              <vertices><vertex x="0" y="0" z="1"/><vertex x="1" y="0" z="1"/><vertex x="0" y="1" z="1"/></vertices>
              <triangles><triangle v1="0" v2="1" v3="2"/></triangles>
            </mesh></object>
          </resources></model>"#;

        let mesh = parse_model(xml, Path::new("inline.3mf")).unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.polygons[1], Polygon::Triangle([3, 4, 5]));
    }

    #[test]
    fn test_bad_coordinate_is_parse_error() {
        let xml = r#"<model><resources><object><mesh><vertices>
            <vertex x="abc" y="0" z="0"/>
          </vertices></mesh></object></resources></model>"#;
        assert!(parse_model(xml, Path::new("bad.3mf")).is_err());
    }
}
