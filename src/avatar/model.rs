//! Avatar model parsed from a binary glTF (GLB) / VRM asset

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::lip_sync::MOUTH_OPEN_EXPRESSION;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const GLB_VERSION: u32 = 2;
const GLB_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_JSON: u32 = 0x4E4F_534A; // "JSON"
const CHUNK_BIN: u32 = 0x004E_4942; // "BIN\0"

#[derive(Debug, Default, Deserialize)]
struct GltfDocument {
    #[serde(default)]
    asset: Option<GltfAsset>,
    #[serde(default)]
    nodes: Vec<GltfNode>,
    #[serde(default)]
    skins: Vec<GltfSkin>,
    #[serde(default)]
    extensions: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct GltfAsset {
    #[serde(default)]
    generator: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GltfNode {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GltfSkin {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    joints: Vec<usize>,
}

/// Skeleton binding: the nodes a skinned mesh is weighted to
#[derive(Debug, Clone, PartialEq)]
pub struct Skin {
    pub name: Option<String>,
    pub joints: Vec<usize>,
}

/// Named blend-weight controls (VRM expressions)
#[derive(Debug, Clone, Default)]
pub struct ExpressionManager {
    weights: BTreeMap<String, f32>,
}

impl ExpressionManager {
    pub fn register(&mut self, name: impl Into<String>) {
        self.weights.entry(name.into()).or_insert(0.0);
    }

    /// Set an expression weight; unknown names are ignored
    ///
    /// Returns false if the model has no expression with that name.
    pub fn set_value(&mut self, name: &str, value: f32) -> bool {
        match self.weights.get_mut(name) {
            Some(weight) => {
                *weight = value;
                true
            }
            None => false,
        }
    }

    /// Raw weight as last set
    pub fn value(&self, name: &str) -> Option<f32> {
        self.weights.get(name).copied()
    }

    /// Weight as applied to the mesh, clamped to 0..=1
    pub fn applied(&self, name: &str) -> Option<f32> {
        self.value(name).map(|w| w.clamp(0.0, 1.0))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Loaded avatar: skeleton, expression surface and animation clock
#[derive(Debug, Clone)]
pub struct AvatarModel {
    pub generator: Option<String>,
    pub node_names: Vec<Option<String>>,
    pub skins: Vec<Skin>,
    pub expressions: ExpressionManager,
    /// Size of the embedded binary buffer, if any
    pub binary_len: usize,
    elapsed_secs: f32,
    updates: u64,
}

impl AvatarModel {
    /// Parse a GLB container and its VRM extensions
    pub fn from_glb(bytes: &[u8]) -> Result<Self> {
        let (json, bin) = split_glb(bytes)?;

        let doc: GltfDocument =
            serde_json::from_slice(json).context("Failed to parse glTF JSON chunk")?;

        let expressions = doc
            .extensions
            .as_ref()
            .map(read_expressions)
            .unwrap_or_default();

        let model = Self {
            generator: doc.asset.and_then(|a| a.generator),
            node_names: doc.nodes.into_iter().map(|n| n.name).collect(),
            skins: doc
                .skins
                .into_iter()
                .map(|s| Skin {
                    name: s.name,
                    joints: s.joints,
                })
                .collect(),
            expressions,
            binary_len: bin.map_or(0, <[u8]>::len),
            elapsed_secs: 0.0,
            updates: 0,
        };

        debug!(
            "Parsed avatar: {} nodes, {} skins, {} expressions",
            model.node_names.len(),
            model.skins.len(),
            model.expressions.len()
        );

        Ok(model)
    }

    /// Drop duplicate and dangling joint references from every skin
    ///
    /// Returns the number of joint entries removed.
    pub fn remove_unnecessary_joints(&mut self) -> usize {
        let node_count = self.node_names.len();
        let mut removed = 0;

        for skin in &mut self.skins {
            let mut seen = HashSet::new();
            let before = skin.joints.len();
            skin.joints
                .retain(|&joint| joint < node_count && seen.insert(joint));
            removed += before - skin.joints.len();
        }

        removed
    }

    /// Advance the model's animation state
    pub fn update(&mut self, delta_secs: f32) {
        if delta_secs.is_finite() && delta_secs > 0.0 {
            self.elapsed_secs += delta_secs;
        }
        self.updates += 1;
    }

    pub fn set_expression(&mut self, name: &str, value: f32) -> bool {
        self.expressions.set_value(name, value)
    }

    pub fn has_mouth_expression(&self) -> bool {
        self.expressions.value(MOUTH_OPEN_EXPRESSION).is_some()
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed_secs
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Split a GLB file into its JSON chunk and optional BIN chunk
fn split_glb(bytes: &[u8]) -> Result<(&[u8], Option<&[u8]>)> {
    if bytes.len() < GLB_HEADER_LEN {
        bail!("File too short for a GLB header ({} bytes)", bytes.len());
    }

    let magic = read_u32(bytes, 0).unwrap_or_default();
    if magic != GLB_MAGIC {
        bail!("Not a binary glTF file (magic {:#010x})", magic);
    }

    let version = read_u32(bytes, 4).unwrap_or_default();
    if version != GLB_VERSION {
        bail!("Unsupported glTF container version {}", version);
    }

    let declared = read_u32(bytes, 8).unwrap_or_default() as usize;
    if declared > bytes.len() {
        bail!(
            "GLB declares {} bytes but only {} are present",
            declared,
            bytes.len()
        );
    }

    let body = &bytes[..declared];
    let mut offset = GLB_HEADER_LEN;
    let mut json = None;
    let mut bin = None;

    while offset + CHUNK_HEADER_LEN <= body.len() {
        let chunk_len = read_u32(body, offset).unwrap_or_default() as usize;
        let chunk_type = read_u32(body, offset + 4).unwrap_or_default();
        let start = offset + CHUNK_HEADER_LEN;
        let data = body
            .get(start..start + chunk_len)
            .with_context(|| format!("GLB chunk at offset {} is truncated", offset))?;

        match chunk_type {
            CHUNK_JSON if json.is_none() => json = Some(data),
            CHUNK_BIN if bin.is_none() => bin = Some(data),
            // Unknown chunks are skipped
            _ => {}
        }

        offset = start + chunk_len;
    }

    let json = json.context("GLB has no JSON chunk")?;
    // The JSON chunk is padded to 4 bytes with spaces; tolerate NUL padding too
    let end = json
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);

    Ok((&json[..end], bin))
}

/// Collect expression names from VRM 1.0 or VRM 0.x extensions
///
/// The mouth-open viseme is registered as "A" whichever version declares it.
fn read_expressions(extensions: &Value) -> ExpressionManager {
    let mut manager = ExpressionManager::default();

    if let Some(expressions) = extensions.pointer("/VRMC_vrm/expressions") {
        for group in ["preset", "custom"] {
            if let Some(map) = expressions.get(group).and_then(Value::as_object) {
                for name in map.keys() {
                    if group == "preset" && name == "aa" {
                        manager.register(MOUTH_OPEN_EXPRESSION);
                    } else {
                        manager.register(name.clone());
                    }
                }
            }
        }
    }

    if let Some(groups) = extensions
        .pointer("/VRM/blendShapeMaster/blendShapeGroups")
        .and_then(Value::as_array)
    {
        for group in groups {
            let preset = group.get("presetName").and_then(Value::as_str);
            let name = group.get("name").and_then(Value::as_str);
            match (preset, name) {
                (Some("a"), _) => manager.register(MOUTH_OPEN_EXPRESSION),
                (Some(preset), _) if preset != "unknown" => manager.register(preset),
                (_, Some(name)) => manager.register(name),
                _ => {}
            }
        }
    }

    manager
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn glb(doc: &Value, bin: Option<&[u8]>) -> Vec<u8> {
        let mut json = serde_json::to_vec(doc).unwrap();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let mut body = Vec::new();
        body.extend_from_slice(&(json.len() as u32).to_le_bytes());
        body.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        body.extend_from_slice(&json);
        if let Some(bin) = bin {
            body.extend_from_slice(&(bin.len() as u32).to_le_bytes());
            body.extend_from_slice(&CHUNK_BIN.to_le_bytes());
            body.extend_from_slice(bin);
        }
        let mut out = Vec::new();
        out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        out.extend_from_slice(&GLB_VERSION.to_le_bytes());
        out.extend_from_slice(&((GLB_HEADER_LEN + body.len()) as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn parses_vrm1_expressions() {
        let doc = json!({
            "asset": { "version": "2.0", "generator": "UniVRM" },
            "nodes": [{ "name": "hips" }, { "name": "head" }],
            "extensions": { "VRMC_vrm": { "expressions": {
                "preset": { "aa": {}, "blink": {} },
                "custom": { "smirk": {} }
            }}}
        });

        let model = AvatarModel::from_glb(&glb(&doc, Some(&[0u8; 8]))).unwrap();

        assert_eq!(model.generator.as_deref(), Some("UniVRM"));
        assert_eq!(model.node_names.len(), 2);
        assert_eq!(model.binary_len, 8);
        assert!(model.has_mouth_expression());
        let names: Vec<_> = model.expressions.names().collect();
        assert_eq!(names, vec!["A", "blink", "smirk"]);
    }

    #[test]
    fn parses_vrm0_blend_shape_groups() {
        let doc = json!({
            "extensions": { "VRM": { "blendShapeMaster": { "blendShapeGroups": [
                { "name": "A", "presetName": "a" },
                { "name": "Joy", "presetName": "joy" },
                { "name": "Wink", "presetName": "unknown" }
            ]}}}
        });

        let model = AvatarModel::from_glb(&glb(&doc, None)).unwrap();
        let names: Vec<_> = model.expressions.names().collect();
        assert_eq!(names, vec!["A", "Wink", "joy"]);
    }

    #[test]
    fn removes_duplicate_and_dangling_joints() {
        let doc = json!({
            "nodes": [{}, {}, {}],
            "skins": [{ "joints": [0, 1, 1, 2, 7, 0] }]
        });
        let mut model = AvatarModel::from_glb(&glb(&doc, None)).unwrap();

        assert_eq!(model.remove_unnecessary_joints(), 3);
        assert_eq!(model.skins[0].joints, vec![0, 1, 2]);
    }

    #[test]
    fn rejects_bad_containers() {
        assert!(AvatarModel::from_glb(b"glTF").is_err());
        assert!(AvatarModel::from_glb(b"not a gltf file at all").is_err());

        let mut truncated = glb(&json!({}), None);
        truncated.truncate(truncated.len() - 2);
        assert!(AvatarModel::from_glb(&truncated).is_err());
    }

    #[test]
    fn unknown_expression_is_reported() {
        let mut model = AvatarModel::from_glb(&glb(&json!({}), None)).unwrap();
        assert!(!model.set_expression("A", 0.5));
        assert!(model.expressions.is_empty());
    }

    #[test]
    fn applied_weight_is_clamped() {
        let mut expressions = ExpressionManager::default();
        expressions.register("A");

        assert!(expressions.set_value("A", 1.4));
        assert_eq!(expressions.value("A"), Some(1.4));
        assert_eq!(expressions.applied("A"), Some(1.0));

        expressions.set_value("A", -0.2);
        assert_eq!(expressions.applied("A"), Some(0.0));
        assert_eq!(expressions.applied("O"), None);
    }

    #[test]
    fn update_accumulates_time() {
        let mut model = AvatarModel::from_glb(&glb(&json!({}), None)).unwrap();
        model.update(0.016);
        model.update(0.016);
        model.update(-1.0);
        assert!((model.elapsed_secs() - 0.032).abs() < 1e-6);
        assert_eq!(model.update_count(), 3);
    }
}
