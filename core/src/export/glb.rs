//! GLB container assembly.

use gltf_json as json;

use crate::error::{PipelineError, Result};

const MAGIC: &[u8; 4] = b"glTF";
const CHUNK_JSON: u32 = 0x4E4F534A;
const CHUNK_BIN: u32 = 0x004E4942;

/// Assemble a binary glTF container: 12-byte header, space-padded JSON
/// chunk, zero-padded BIN chunk (omitted when the buffer is empty).
pub fn assemble_glb(root: &json::Root, buffer_data: &[u8]) -> Result<Vec<u8>> {
    let json_string =
        json::serialize::to_string(root).map_err(|e| PipelineError::ExportEncoding {
            format: "glb".to_string(),
            detail: format!("JSON serialization failed: {e}"),
        })?;
    let json_bytes = json_string.as_bytes();

    let json_padding = (4 - (json_bytes.len() % 4)) % 4;
    let json_chunk_length = json_bytes.len() + json_padding;

    let buffer_padding = (4 - (buffer_data.len() % 4)) % 4;
    let buffer_chunk_length = buffer_data.len() + buffer_padding;

    let has_bin = !buffer_data.is_empty();
    let total_length = 12 + 8 + json_chunk_length + if has_bin { 8 + buffer_chunk_length } else { 0 };

    let mut glb = Vec::with_capacity(total_length);

    glb.extend_from_slice(MAGIC);
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total_length as u32).to_le_bytes());

    glb.extend_from_slice(&(json_chunk_length as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    glb.extend_from_slice(json_bytes);
    for _ in 0..json_padding {
        glb.push(b' ');
    }

    if has_bin {
        glb.extend_from_slice(&(buffer_chunk_length as u32).to_le_bytes());
        glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        glb.extend_from_slice(buffer_data);
        for _ in 0..buffer_padding {
            glb.push(0);
        }
    }

    Ok(glb)
}
