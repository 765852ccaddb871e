//! Example: mixing two meshes from a TOML configuration
//!
//! Builds a `MixConfig` in code and from TOML, prints both serializations,
//! then mixes two overlapping cubes in memory.
//!
//! Run with: `cargo run -p fogmix-volume --example mix_config`

use fogmix_mesh::{InMemorySource, Mesh};
use fogmix_volume::{mix_sources, MixConfig, MixContext, MixOperator};
use nalgebra::{Matrix4, Point3, Vector3};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // =========================================================================
    // 1. Create a config programmatically
    // =========================================================================

    let mut config = MixConfig::default();
    config.voxelize.voxel_size = 0.05;
    config.voxelize.band_interior = 3.0;
    config.voxelize.band_exterior = 3.0;
    config.combine.operator = MixOperator::Max;

    // =========================================================================
    // 2. Serialize to TOML and JSON
    // =========================================================================

    println!("=== TOML Output ===\n{}", config.to_toml()?);
    println!("=== JSON Output ===\n{}", config.to_json()?);

    // =========================================================================
    // 3. Parse config from TOML string
    // =========================================================================

    let toml_input = r#"
        threads = 0

        [voxelize]
        voxel_size = 0.1
        band_interior = 3.0
        band_exterior = 3.0

        [fog]
        falloff = 0.1
        curve = "smoothstep"

        [combine]
        operator = "multiply"

        [extract]
        threshold = 0.5
        adaptivity = 0.1
    "#;

    let parsed = MixConfig::from_toml_str(toml_input)?;
    println!(
        "\n=== Parsed Config ===\nOperator: {}\nVoxel size: {}\nCurve: {:?}",
        parsed.combine.operator, parsed.voxelize.voxel_size, parsed.fog.curve
    );

    // =========================================================================
    // 4. Mix two overlapping cubes
    // =========================================================================

    let cube = Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
    let a = InMemorySource::new("left", cube.clone());
    let b = InMemorySource::new("right", cube)
        .with_world(Matrix4::new_translation(&Vector3::new(0.5, 0.25, 0.0)));

    let ctx = MixContext::new(parsed)?;
    let out = mix_sources(&ctx, &a, &b)?;

    println!(
        "\n=== Mix Result ===\nThreads: {}\nOutput: {} vertices, {} polygons\nVolume: {:.4}",
        out.stats.threads,
        out.stats.vertices,
        out.stats.polygons,
        out.mesh.volume()
    );
    for input in &out.stats.inputs {
        println!(
            "  {}: {} leaves, {} tiles ({:.1} ms voxelize)",
            input.name, input.fog.leaves, input.fog.tiles, input.voxelize_ms
        );
    }

    let report = out.mesh.validate();
    println!("\nValidation:");
    println!("  Watertight: {}", report.is_watertight);
    println!("  Manifold: {}", report.is_manifold);

    Ok(())
}
