//! End-to-end pipeline tests over programmatically generated assets.

mod fixtures;

use meshpress_core::error::PipelineError;
use meshpress_core::export::{ExportFormat, ExportOptions, ExportPayload};
use meshpress_core::loader::{self, RawInput};
use meshpress_core::optimize::{
    NormalMode, OptimizationSpec, SimplifySettings, StageName, TextureFormat, TextureSettings,
};
use meshpress_core::options::PipelineOptions;
use meshpress_core::progress::{PipelinePhase, ProgressEvent};
use meshpress_core::resource::ResourceMap;
use meshpress_core::service::ModelPipeline;
use tempfile::tempdir;

fn glb_input(data: Vec<u8>, name: &str) -> RawInput {
    RawInput::Bytes {
        data,
        name: name.to_string(),
    }
}

fn glb_bytes(payload: &ExportPayload) -> &[u8] {
    match payload {
        ExportPayload::Binary(bytes) => bytes,
        ExportPayload::Descriptor { .. } => panic!("expected a GLB payload"),
    }
}

#[test]
fn disabled_pipeline_is_a_pass_through() {
    let input = glb_input(fixtures::textured_grid_glb(4, 4), "grid.glb");
    let mut pipeline = ModelPipeline::new();
    let processed = pipeline
        .process_with_options(input, &PipelineOptions::default(), None)
        .expect("process grid");

    assert_eq!(processed.report.stages.len(), 5, "all stages reported");
    for stage in &processed.report.stages {
        assert_eq!(
            stage.before, stage.after,
            "disabled stage '{}' must not change metrics",
            stage.stage
        );
    }
    assert_eq!(processed.report.total.before, processed.report.total.after);

    let reparsed = gltf::Gltf::from_slice(glb_bytes(&processed.export.payload))
        .expect("exported GLB parses");
    assert_eq!(reparsed.materials().count(), 1);
    assert_eq!(reparsed.images().count(), 1);
    let primitive = reparsed
        .meshes()
        .next()
        .and_then(|m| m.primitives().next())
        .expect("one primitive");
    let positions = primitive
        .attributes()
        .find(|(sem, _)| *sem == gltf::Semantic::Positions)
        .map(|(_, acc)| acc.count())
        .expect("positions present");
    assert_eq!(positions, 25, "5x5 grid corners");
    assert_eq!(
        primitive.indices().map(|a| a.count()),
        Some(96),
        "32 triangles"
    );
}

#[test]
fn end_to_end_shrinks_without_touching_textures() {
    let source = fixtures::textured_grid_glb(10, 10);
    let input_size = source.len() as u64;
    let spec = OptimizationSpec {
        dedup: true,
        simplify: Some(SimplifySettings { ratio: 0.3 }),
        normals: Some(NormalMode::Smooth),
        quantize: true,
        texture: None,
    };
    let mut pipeline = ModelPipeline::new();
    let processed = pipeline
        .process(
            glb_input(source, "model.glb"),
            &spec,
            &ExportOptions::default(),
            None,
        )
        .expect("process");

    assert!(
        processed.export.byte_size < input_size,
        "output ({} bytes) must be smaller than the input ({input_size} bytes)",
        processed.export.byte_size
    );
    let texture = processed.report.stage(StageName::Texture);
    assert_eq!(texture.before, texture.after, "texture metrics untouched");
    assert_eq!(
        processed.report.total.before.texture_bytes,
        processed.report.total.after.texture_bytes
    );
}

#[test]
fn external_buffers_resolve_under_every_key_variant() {
    let uri = "data/mesh%20data.bin";
    let (json, payload) = fixtures::triangle_gltf_with_external_buffer(uri);

    let keys = [
        "data/mesh%20data.bin",
        "data/mesh data.bin",
        "mesh%20data.bin",
        "./mesh%20data.bin",
        "./mesh data.bin",
    ];
    for key in keys {
        let mut resources = ResourceMap::new();
        resources.insert(key, payload.clone());
        let input = RawInput::WithResources {
            data: json.clone(),
            name: "tri.gltf".to_string(),
            resources,
        };
        let loaded = loader::load(input, None, &Default::default())
            .unwrap_or_else(|e| panic!("key '{key}' should resolve: {e}"));
        assert_eq!(loaded.document.triangle_count(), 1);
    }
}

#[test]
fn missing_buffer_names_the_unresolved_reference() {
    let (json, payload) = fixtures::triangle_gltf_with_external_buffer("geometry.bin");
    let mut resources = ResourceMap::new();
    resources.insert("something_else.bin", payload);
    let input = RawInput::WithResources {
        data: json,
        name: "tri.gltf".to_string(),
        resources,
    };
    let err = loader::load(input, None, &Default::default())
        .expect_err("unresolvable buffer must fail");
    match err {
        PipelineError::MissingResource {
            name,
            missing,
            available,
        } => {
            assert_eq!(name, "tri.gltf");
            assert_eq!(missing, vec!["geometry.bin".to_string()]);
            assert_eq!(available, vec!["something_else.bin".to_string()]);
        }
        other => panic!("expected MissingResource, got {other:?}"),
    }
}

#[test]
fn path_input_reads_sibling_resource_files() {
    let dir = tempdir().expect("tempdir");
    let (json, payload) = fixtures::triangle_gltf_with_external_buffer("geometry.bin");
    std::fs::write(dir.path().join("tri.gltf"), json).expect("write gltf");
    std::fs::write(dir.path().join("geometry.bin"), payload).expect("write buffer");

    let loaded = loader::load(
        RawInput::Path(dir.path().join("tri.gltf")),
        None,
        &Default::default(),
    )
    .expect("load from disk");
    assert_eq!(loaded.document.triangle_count(), 1);
    assert_eq!(loaded.document.vertex_count(), 3);
}

#[test]
fn dedup_welds_shared_vertices_and_is_idempotent() {
    let spec = OptimizationSpec {
        dedup: true,
        ..Default::default()
    };
    let mut pipeline = ModelPipeline::new();
    let first = pipeline
        .process(
            glb_input(fixtures::quad_with_duplicate_vertices_glb(), "quad.glb"),
            &spec,
            &ExportOptions::default(),
            None,
        )
        .expect("first pass");

    let dedup = first.report.stage(StageName::Dedup);
    assert_eq!(dedup.before.vertices, 6);
    assert_eq!(dedup.after.vertices, 4);
    assert_eq!(dedup.before.triangles, 2);
    assert_eq!(dedup.after.triangles, 2);

    // Feeding the welded output back in must find nothing left to weld.
    let second = pipeline
        .process(
            glb_input(glb_bytes(&first.export.payload).to_vec(), "quad.glb"),
            &spec,
            &ExportOptions::default(),
            None,
        )
        .expect("second pass");
    let dedup = second.report.stage(StageName::Dedup);
    assert_eq!(dedup.before, dedup.after, "second dedup pass is a no-op");
}

#[test]
fn simplify_ratio_one_keeps_every_triangle() {
    let spec = OptimizationSpec {
        simplify: Some(SimplifySettings { ratio: 1.0 }),
        ..Default::default()
    };
    let mut pipeline = ModelPipeline::new();
    let processed = pipeline
        .process(
            glb_input(fixtures::grid_glb(10, 10), "grid.glb"),
            &spec,
            &ExportOptions::default(),
            None,
        )
        .expect("process");
    let simplify = processed.report.stage(StageName::Simplify);
    assert_eq!(simplify.before.triangles, 200);
    assert_eq!(simplify.after.triangles, 200);
}

#[test]
fn simplify_halves_a_dense_grid() {
    // 20 x 25 cells = 1000 triangles.
    let spec = OptimizationSpec {
        simplify: Some(SimplifySettings { ratio: 0.5 }),
        ..Default::default()
    };
    let mut pipeline = ModelPipeline::new();
    let processed = pipeline
        .process(
            glb_input(fixtures::grid_glb(20, 25), "grid.glb"),
            &spec,
            &ExportOptions::default(),
            None,
        )
        .expect("process");
    let simplify = processed.report.stage(StageName::Simplify);
    assert_eq!(simplify.before.triangles, 1000);
    assert!(
        simplify.after.triangles <= 500,
        "expected at most 500 triangles, got {}",
        simplify.after.triangles
    );
    assert!(simplify.after.triangles > 0, "mesh must not vanish");

    let reparsed = gltf::Gltf::from_slice(glb_bytes(&processed.export.payload))
        .expect("simplified GLB parses");
    assert_eq!(reparsed.meshes().count(), 1);
}

#[test]
fn stage_metrics_chain_through_the_fixed_order() {
    let spec = OptimizationSpec {
        dedup: true,
        simplify: Some(SimplifySettings { ratio: 0.5 }),
        quantize: true,
        ..Default::default()
    };
    let mut pipeline = ModelPipeline::new();
    let processed = pipeline
        .process(
            glb_input(fixtures::grid_glb(10, 10), "grid.glb"),
            &spec,
            &ExportOptions::default(),
            None,
        )
        .expect("process");

    let order: Vec<StageName> = processed.report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        order,
        vec![
            StageName::Dedup,
            StageName::Simplify,
            StageName::Normals,
            StageName::Quantize,
            StageName::Texture,
        ]
    );

    let simplify = processed.report.stage(StageName::Simplify);
    let normals = processed.report.stage(StageName::Normals);
    let quantize = processed.report.stage(StageName::Quantize);
    assert_eq!(normals.before, normals.after, "disabled stage is inert");
    assert_eq!(
        simplify.after.triangles, quantize.before.triangles,
        "each stage starts from its predecessor's output"
    );
    assert!(
        quantize.after.document_bytes < quantize.before.document_bytes,
        "quantization shrinks geometry"
    );
}

#[test]
fn line_primitives_survive_the_pipeline() {
    let loaded = loader::load(
        glb_input(fixtures::line_strip_glb(), "strip.glb"),
        None,
        &Default::default(),
    )
    .expect("line strip loads");
    assert_eq!(loaded.document.vertex_count(), 3);
    assert_eq!(loaded.document.triangle_count(), 0);

    // Every stage enabled must still leave the strip intact.
    let spec = OptimizationSpec {
        dedup: true,
        simplify: Some(SimplifySettings { ratio: 0.5 }),
        normals: Some(NormalMode::Smooth),
        quantize: true,
        ..Default::default()
    };
    let mut pipeline = ModelPipeline::new();
    let processed = pipeline
        .process(
            glb_input(fixtures::line_strip_glb(), "strip.glb"),
            &spec,
            &ExportOptions::default(),
            None,
        )
        .expect("process line strip");
    assert_eq!(processed.report.total.after.vertices, 3);

    let reloaded = loader::load(
        glb_input(glb_bytes(&processed.export.payload).to_vec(), "strip.glb"),
        None,
        &Default::default(),
    )
    .expect("exported strip reloads");
    assert_eq!(reloaded.document.vertex_count(), 3);
    let prim = &reloaded.document.meshes[0].primitives[0];
    assert_eq!(prim.mode, meshpress_core::PrimitiveMode::LineStrip);
    assert_eq!(prim.indices, vec![0, 1, 2]);
}

#[test]
fn unsupported_extension_fails_before_parsing() {
    let err = loader::load(
        glb_input(vec![0, 1, 2, 3], "model.xyz"),
        None,
        &Default::default(),
    )
    .expect_err("unknown extension must fail");
    match err {
        PipelineError::UnsupportedFormat { name, .. } => assert_eq!(name, "model.xyz"),
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
}

#[test]
fn usdz_is_recognized_but_rejected() {
    let err = loader::load(
        glb_input(b"PK".to_vec(), "scene.usdz"),
        None,
        &Default::default(),
    )
    .expect_err("usdz must be rejected");
    match err {
        PipelineError::UnsupportedFormat { name, detail } => {
            assert_eq!(name, "scene.usdz");
            assert!(detail.is_some(), "rejection explains itself");
        }
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
}

#[test]
fn full_pipeline_produces_a_quantized_glb() {
    let spec = OptimizationSpec {
        dedup: true,
        simplify: Some(SimplifySettings { ratio: 0.3 }),
        normals: Some(NormalMode::Smooth),
        quantize: true,
        texture: Some(TextureSettings {
            quality: 70,
            target_format: TextureFormat::Jpeg,
        }),
    };
    let mut pipeline = ModelPipeline::new();
    let processed = pipeline
        .process(
            glb_input(fixtures::textured_grid_glb(10, 10), "model.glb"),
            &spec,
            &ExportOptions::default(),
            None,
        )
        .expect("full pipeline");

    let reparsed = gltf::Gltf::from_slice_without_validation(glb_bytes(&processed.export.payload))
        .expect("output parses");
    assert!(
        reparsed
            .document
            .extensions_used()
            .any(|e| e == "KHR_mesh_quantization"),
        "quantized output declares the extension"
    );
    let image = reparsed.images().next().expect("one image");
    match image.source() {
        gltf::image::Source::View { mime_type, .. } => assert_eq!(mime_type, "image/jpeg"),
        gltf::image::Source::Uri { .. } => panic!("image must stay embedded in GLB"),
    }

    // The exporter's output must feed back into the loader unchanged.
    let reloaded = loader::load(
        glb_input(glb_bytes(&processed.export.payload).to_vec(), "model.glb"),
        None,
        &Default::default(),
    )
    .expect("quantized output reloads");
    assert_eq!(
        reloaded.document.triangle_count(),
        processed.report.total.after.triangles
    );
    assert_eq!(
        reloaded.document.vertex_count(),
        processed.report.total.after.vertices
    );

    let report = &processed.report;
    assert!(
        report.total.after.document_bytes < report.total.before.document_bytes,
        "pipeline shrinks the document"
    );
    let texture = report.stage(StageName::Texture);
    assert!(texture.after.texture_bytes > 0);

    let header = report.header_value().expect("report serializes");
    let parsed: serde_json::Value = serde_json::from_str(&header).expect("header is JSON");
    assert_eq!(parsed["stages"].as_array().map(Vec::len), Some(5));
    assert!(parsed["total"]["after"]["triangles"].is_u64());
}

#[test]
fn gltf_export_splits_out_named_resources() {
    let mut pipeline = ModelPipeline::new();
    let processed = pipeline
        .process(
            glb_input(fixtures::textured_quad_glb(), "quad.glb"),
            &OptimizationSpec::default(),
            &ExportOptions {
                format: ExportFormat::Gltf,
            },
            None,
        )
        .expect("gltf export");

    let (json, resources) = match &processed.export.payload {
        ExportPayload::Descriptor { json, resources } => (json, resources),
        ExportPayload::Binary(_) => panic!("expected a descriptor payload"),
    };
    assert_eq!(resources[0].name, "buffer.bin");
    assert!(
        resources.iter().any(|r| r.name.ends_with(".png")),
        "image written as its own file"
    );

    let root: serde_json::Value = serde_json::from_slice(json).expect("descriptor is JSON");
    assert_eq!(root["buffers"][0]["uri"], "buffer.bin");
    assert!(root["images"][0]["uri"].as_str().is_some_and(|u| u.ends_with(".png")));
}

#[test]
fn progress_events_cover_every_phase_in_order() {
    let mut events: Vec<ProgressEvent> = Vec::new();
    let mut sink = |event: ProgressEvent| events.push(event);
    let mut pipeline = ModelPipeline::new();
    pipeline
        .process_with_options(
            glb_input(fixtures::grid_glb(4, 4), "grid.glb"),
            &PipelineOptions {
                dedup: true,
                quantize: true,
                ..Default::default()
            },
            Some(&mut sink),
        )
        .expect("process");

    let load_checkpoints: Vec<(String, u8)> = events
        .iter()
        .filter(|e| e.phase == PipelinePhase::Load)
        .map(|e| (e.operation.clone(), e.percent))
        .collect();
    assert_eq!(
        load_checkpoints,
        vec![
            ("reading".to_string(), 0),
            ("parsing".to_string(), 50),
            ("validating".to_string(), 75),
            ("ready".to_string(), 100),
        ]
    );

    let phases: Vec<PipelinePhase> = events.iter().map(|e| e.phase).collect();
    let first_optimize = phases
        .iter()
        .position(|p| *p == PipelinePhase::Optimize)
        .expect("optimize events present");
    let first_export = phases
        .iter()
        .position(|p| *p == PipelinePhase::Export)
        .expect("export events present");
    assert!(phases[..first_optimize]
        .iter()
        .all(|p| *p == PipelinePhase::Load));
    assert!(first_optimize < first_export);
    assert!(phases[first_export..]
        .iter()
        .all(|p| *p == PipelinePhase::Export));
    assert!(events.iter().all(|e| e.percent <= 100));
}

#[test]
fn cancellation_stops_the_pipeline() {
    let mut pipeline = ModelPipeline::new();
    pipeline.cancel_token().cancel();
    let err = pipeline
        .process_with_options(
            glb_input(fixtures::grid_glb(4, 4), "grid.glb"),
            &PipelineOptions::default(),
            None,
        )
        .expect_err("cancelled run must fail");
    assert!(matches!(err, PipelineError::Cancelled));
}
