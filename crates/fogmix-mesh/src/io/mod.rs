//! Mesh file I/O for STL, OBJ, PLY and 3MF formats.

mod ply;
mod threemf;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::{Mesh, Polygon, Vertex};

pub use ply::{load_ply, save_ply};
pub use threemf::{load_3mf, save_3mf};

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Stl,
    Obj,
    Ply,
    ThreeMf,
}

impl MeshFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| match ext.as_str() {
                "stl" => Some(MeshFormat::Stl),
                "obj" => Some(MeshFormat::Obj),
                "ply" => Some(MeshFormat::Ply),
                "3mf" => Some(MeshFormat::ThreeMf),
                _ => None,
            })
    }

    /// Whether vertices are stored once per triangle rather than shared.
    pub fn has_unshared_vertices(&self) -> bool {
        matches!(self, MeshFormat::Stl)
    }

    fn require(path: &Path) -> MeshResult<Self> {
        Self::from_path(path).ok_or_else(|| MeshError::UnsupportedFormat {
            extension: path.extension().and_then(|e| e.to_str()).map(String::from),
        })
    }
}

/// Map an I/O error on `path` into a write error.
pub(crate) fn write_err(path: &Path) -> impl Fn(std::io::Error) -> MeshError + '_ {
    move |source| MeshError::IoWrite {
        path: path.to_path_buf(),
        source,
    }
}

/// Map an I/O error on `path` into a read error.
pub(crate) fn read_err(path: &Path) -> impl Fn(std::io::Error) -> MeshError + '_ {
    move |source| MeshError::IoRead {
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn parse_err(path: &Path, details: impl Into<String>) -> MeshError {
    MeshError::ParseError {
        path: path.to_path_buf(),
        details: details.into(),
    }
}

/// Push an n-gon, keeping triangles and quads and fan-splitting anything larger.
pub(crate) fn push_ngon(mesh: &mut Mesh, corners: &[u32]) -> bool {
    match *corners {
        [a, b, c] => mesh.polygons.push(Polygon::Triangle([a, b, c])),
        [a, b, c, d] => mesh.polygons.push(Polygon::Quad([a, b, c, d])),
        [first, ref rest @ ..] if rest.len() > 3 => {
            for pair in rest.windows(2) {
                mesh.polygons.push(Polygon::Triangle([first, pair[0], pair[1]]));
            }
        }
        _ => return false,
    }
    true
}

/// Load a mesh from file, auto-detecting format from extension.
///
/// Indices are checked against the vertex count.
pub fn load_mesh(path: &Path) -> MeshResult<Mesh> {
    let format = MeshFormat::require(path)?;

    info!("Loading mesh from {:?} (format: {:?})", path, format);

    let mesh = match format {
        MeshFormat::Stl => load_stl(path)?,
        MeshFormat::Obj => load_obj(path)?,
        MeshFormat::Ply => load_ply(path)?,
        MeshFormat::ThreeMf => load_3mf(path)?,
    };

    if mesh.vertices.is_empty() || mesh.polygons.is_empty() {
        return Err(MeshError::EmptyMesh {
            details: format!("{} has no vertices or polygons", path.display()),
        });
    }

    mesh.check_indices()?;

    if let Some((min, max)) = mesh.bounds() {
        let dims = max - min;
        info!(
            "Loaded mesh: {} vertices, {} polygons",
            mesh.vertex_count(),
            mesh.polygon_count()
        );
        debug!(
            "Bounding box: [{:.3}, {:.3}, {:.3}] to [{:.3}, {:.3}, {:.3}]",
            min.x, min.y, min.z, max.x, max.y, max.z
        );

        let max_dim = dims.x.max(dims.y).max(dims.z);
        if max_dim < 1e-3 {
            warn!("Mesh largest dimension is {:.6}; check the voxel size", max_dim);
        }
    }

    Ok(mesh)
}

/// Load mesh from STL file (binary or ASCII).
fn load_stl(path: &Path) -> MeshResult<Mesh> {
    let file = File::open(path).map_err(read_err(path))?;
    let mut reader = BufReader::new(file);

    let stl = stl_io::read_stl(&mut reader).map_err(|e| parse_err(path, e.to_string()))?;

    debug!(
        "STL contains {} vertices, {} triangles",
        stl.vertices.len(),
        stl.faces.len()
    );

    let mut mesh = Mesh::with_capacity(stl.vertices.len(), stl.faces.len());
    for v in &stl.vertices {
        mesh.vertices
            .push(Vertex::from_coords(v.0[0] as f64, v.0[1] as f64, v.0[2] as f64));
    }
    for face in &stl.faces {
        mesh.polygons.push(Polygon::Triangle([
            face.vertices[0] as u32,
            face.vertices[1] as u32,
            face.vertices[2] as u32,
        ]));
    }

    Ok(mesh)
}

/// Load mesh from OBJ file. Quads survive; larger faces are fan-triangulated.
fn load_obj(path: &Path) -> MeshResult<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: false,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| parse_err(path, e.to_string()))?;

    if models.is_empty() {
        return Err(MeshError::EmptyMesh {
            details: "OBJ file contains no models".to_string(),
        });
    }

    // Merge all models into a single mesh
    let mut mesh = Mesh::new();

    for model in &models {
        let obj_mesh = &model.mesh;
        let vertex_offset = mesh.vertices.len() as u32;

        for chunk in obj_mesh.positions.chunks_exact(3) {
            mesh.vertices.push(Vertex::from_coords(
                chunk[0] as f64,
                chunk[1] as f64,
                chunk[2] as f64,
            ));
        }

        // Empty arities means every face is a triangle.
        let arities: Vec<usize> = if obj_mesh.face_arities.is_empty() {
            vec![3; obj_mesh.indices.len() / 3]
        } else {
            obj_mesh.face_arities.iter().map(|&n| n as usize).collect()
        };

        let mut cursor = 0usize;
        let mut corners = Vec::with_capacity(4);
        for arity in arities {
            let Some(face) = obj_mesh.indices.get(cursor..cursor + arity) else {
                return Err(parse_err(path, "face indices truncated"));
            };
            corners.clear();
            corners.extend(face.iter().map(|&i| i + vertex_offset));
            if !push_ngon(&mut mesh, &corners) {
                warn!("Skipping OBJ face with {} corners", arity);
            }
            cursor += arity;
        }

        debug!(
            "OBJ model '{}': {} vertices",
            model.name,
            obj_mesh.positions.len() / 3
        );
    }

    debug!(
        "OBJ loaded: {} vertices, {} polygons from {} models",
        mesh.vertices.len(),
        mesh.polygons.len(),
        models.len()
    );

    Ok(mesh)
}

/// Save mesh to file, auto-detecting format from extension.
pub fn save_mesh(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    match MeshFormat::require(path)? {
        MeshFormat::Stl => save_stl(mesh, path),
        MeshFormat::Obj => save_obj(mesh, path),
        MeshFormat::Ply => save_ply(mesh, path),
        MeshFormat::ThreeMf => save_3mf(mesh, path),
    }
}

/// Save mesh to STL file (binary format). Quads are split into triangles.
pub fn save_stl(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    info!("Saving mesh to {:?}", path);

    let file = File::create(path).map_err(write_err(path))?;
    let mut writer = BufWriter::new(file);

    let triangles: Vec<stl_io::Triangle> = mesh
        .triangles()
        .map(|tri| {
            let n = tri.normal().unwrap_or_else(Vector3::zeros);
            stl_io::Triangle {
                normal: stl_io::Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                vertices: [tri.v0, tri.v1, tri.v2]
                    .map(|v| stl_io::Vertex::new([v.x as f32, v.y as f32, v.z as f32])),
            }
        })
        .collect();

    stl_io::write_stl(&mut writer, triangles.iter()).map_err(write_err(path))?;
    writer.flush().map_err(write_err(path))?;

    info!("Saved {} triangles to {:?}", triangles.len(), path);

    Ok(())
}

/// Save mesh to OBJ file (ASCII format).
///
/// Vertex order and polygon arity are kept exactly, so quads survive a
/// round trip. Normals are written when every vertex carries one.
pub fn save_obj(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    info!("Saving mesh to {:?} (OBJ format)", path);

    let file = File::create(path).map_err(write_err(path))?;
    let mut writer = BufWriter::new(file);
    write_obj(mesh, &mut writer).map_err(write_err(path))?;
    writer.flush().map_err(write_err(path))?;

    info!(
        "Saved {} vertices and {} polygons to {:?}",
        mesh.vertices.len(),
        mesh.polygons.len(),
        path
    );

    Ok(())
}

fn write_obj(mesh: &Mesh, w: &mut impl Write) -> std::io::Result<()> {
    writeln!(w, "# OBJ file exported by fogmix")?;
    writeln!(w, "# Vertices: {}", mesh.vertices.len())?;
    writeln!(w, "# Polygons: {}", mesh.polygons.len())?;
    writeln!(w)?;

    let has_normals = !mesh.vertices.is_empty() && mesh.vertices.iter().all(|v| v.normal.is_some());

    for v in &mesh.vertices {
        writeln!(w, "v {:.9} {:.9} {:.9}", v.position.x, v.position.y, v.position.z)?;
    }

    if has_normals {
        writeln!(w)?;
        for n in mesh.vertices.iter().filter_map(|v| v.normal.as_ref()) {
            writeln!(w, "vn {:.6} {:.6} {:.6}", n.x, n.y, n.z)?;
        }
    }

    writeln!(w)?;
    for poly in &mesh.polygons {
        write!(w, "f")?;
        for &i in poly.indices() {
            // OBJ uses 1-based indexing
            if has_normals {
                write!(w, " {}//{}", i + 1, i + 1)?;
            } else {
                write!(w, " {}", i + 1)?;
            }
        }
        writeln!(w)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_stl() -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".stl").unwrap();

        writeln!(file, "solid test").unwrap();
        writeln!(file, "  facet normal 0 0 1").unwrap();
        writeln!(file, "    outer loop").unwrap();
        writeln!(file, "      vertex 0 0 0").unwrap();
        writeln!(file, "      vertex 100 0 0").unwrap();
        writeln!(file, "      vertex 0 100 0").unwrap();
        writeln!(file, "    endloop").unwrap();
        writeln!(file, "  endfacet").unwrap();
        writeln!(file, "endsolid test").unwrap();

        file
    }

    fn unit_cube() -> Mesh {
        Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            MeshFormat::from_path(Path::new("test.stl")),
            Some(MeshFormat::Stl)
        );
        assert_eq!(
            MeshFormat::from_path(Path::new("test.STL")),
            Some(MeshFormat::Stl)
        );
        assert_eq!(
            MeshFormat::from_path(Path::new("test.ply")),
            Some(MeshFormat::Ply)
        );
        assert_eq!(
            MeshFormat::from_path(Path::new("a.3mf")),
            Some(MeshFormat::ThreeMf)
        );
        assert_eq!(MeshFormat::from_path(Path::new("test.xyz")), None);
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let err = load_mesh(Path::new("model.fbx")).unwrap_err();
        assert!(matches!(err, MeshError::UnsupportedFormat { .. }));
        assert!(err.is_io());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_mesh(&dir.path().join("missing.obj")).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_load_stl() {
        let file = create_test_stl();
        let mesh = load_mesh(file.path()).expect("should load");

        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.polygon_count(), 1);

        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(100.0, 100.0, 0.0));
    }

    #[test]
    fn test_save_stl_splits_quads() {
        let file = NamedTempFile::with_suffix(".stl").unwrap();
        save_stl(&unit_cube(), file.path()).expect("should save");

        let reloaded = load_mesh(file.path()).expect("should reload");
        assert_eq!(reloaded.polygon_count(), 12);
        assert!(reloaded
            .polygons
            .iter()
            .all(|p| matches!(p, Polygon::Triangle(_))));
        assert!((reloaded.volume() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_obj_round_trip_keeps_quads() {
        let mesh = unit_cube();
        let file = NamedTempFile::with_suffix(".obj").unwrap();
        save_obj(&mesh, file.path()).expect("should save");

        let reloaded = load_mesh(file.path()).expect("should reload");
        assert_eq!(reloaded.vertex_count(), 8);
        assert_eq!(reloaded.polygon_count(), 6);
        assert!(reloaded.polygons.iter().all(|p| p.is_quad()));
        assert!((reloaded.volume() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_obj_preserves_positions_and_indices() {
        let mut mesh = Mesh::new();
        for (x, y, z) in [(0.0, 0.0, 0.0), (10.0, 0.0, 0.0), (0.0, 10.0, 0.0), (0.0, 0.0, 10.0)] {
            let mut v = Vertex::from_coords(x, y, z);
            v.normal = Some(Vector3::new(0.0, 0.0, 1.0));
            mesh.vertices.push(v);
        }
        mesh.polygons = vec![
            Polygon::Triangle([0, 2, 1]),
            Polygon::Triangle([0, 3, 2]),
            Polygon::Triangle([0, 1, 3]),
            Polygon::Triangle([1, 2, 3]),
        ];

        let file = NamedTempFile::with_suffix(".obj").unwrap();
        save_obj(&mesh, file.path()).expect("should save");
        let reloaded = load_mesh(file.path()).expect("should reload");

        assert_eq!(reloaded.vertex_count(), 4);
        for (orig, loaded) in mesh.vertices.iter().zip(&reloaded.vertices) {
            assert!((orig.position - loaded.position).norm() < 1e-5);
        }
        assert_eq!(reloaded.polygons, mesh.polygons);
    }

    #[test]
    fn test_obj_pentagon_is_fan_split() {
        let mut file = NamedTempFile::with_suffix(".obj").unwrap();
        writeln!(file, "v 0 0 0\nv 1 0 0\nv 1.5 1 0\nv 0.5 1.5 0\nv -0.5 1 0").unwrap();
        writeln!(file, "f 1 2 3 4 5").unwrap();
        file.flush().unwrap();

        let mesh = load_mesh(file.path()).expect("should load");
        assert_eq!(mesh.polygon_count(), 3);
        assert_eq!(mesh.polygons[0], Polygon::Triangle([0, 1, 2]));
        assert_eq!(mesh.polygons[2], Polygon::Triangle([0, 3, 4]));
    }

    #[test]
    fn test_save_to_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_mesh(&unit_cube(), &dir.path().join("out.dae")).unwrap_err();
        assert!(matches!(err, MeshError::UnsupportedFormat { .. }));
    }
}
