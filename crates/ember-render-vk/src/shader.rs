// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V loading and runtime GLSL compilation for the compute stage.
use std::io::Cursor;
use std::path::Path;

use ember_render::{RenderError, RenderResult};
use tracing::{debug, warn};

const SPIRV_MAGIC: u32 = 0x0723_0203;

static EMBEDDED: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/procedural.comp.spv"));

/// Validated SPIR-V words for one compute shader.
#[derive(Clone, Debug)]
pub struct ShaderBinary(Vec<u32>);

impl ShaderBinary {
    /// The path tracer compiled by the build script.
    pub fn embedded() -> RenderResult<Self> {
        Self::from_spirv_bytes(EMBEDDED)
    }

    pub fn from_spirv_bytes(bytes: &[u8]) -> RenderResult<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| RenderError::Shader(format!("invalid SPIR-V: {e}")))?;
        match words.first() {
            Some(&SPIRV_MAGIC) => Ok(Self(words)),
            _ => Err(RenderError::Shader("missing SPIR-V magic".into())),
        }
    }

    /// Compiles compute GLSL. `name` only appears in diagnostics.
    ///
    /// The source must take its workgroup size from specialization constants
    /// 0 and 1, since dispatch counts are derived from `WORKGROUP_SIZE`.
    pub fn compile_glsl(source: &str, name: &str) -> RenderResult<Self> {
        if !workgroup_from_spec_constants(source) {
            return Err(RenderError::Shader(format!(
                "{name}: workgroup size must be declared as \
                 layout(local_size_x_id = 0, local_size_y_id = 1) in;"
            )));
        }
        let compiler = shaderc::Compiler::new()
            .map_err(|e| RenderError::Shader(format!("shaderc unavailable: {e}")))?;
        let mut opts = shaderc::CompileOptions::new()
            .map_err(|e| RenderError::Shader(format!("shaderc options: {e}")))?;
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let artifact = compiler
            .compile_into_spirv(source, shaderc::ShaderKind::Compute, name, "main", Some(&opts))
            .map_err(|e| RenderError::Shader(e.to_string()))?;
        if artifact.get_num_warnings() > 0 {
            warn!(shader = name, "{}", artifact.get_warning_messages());
        }
        debug!(shader = name, words = artifact.len(), "compiled compute shader");
        Ok(Self(artifact.as_binary().to_vec()))
    }

    pub fn load_glsl(path: &Path) -> RenderResult<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| RenderError::Shader(format!("{}: {e}", path.display())))?;
        Self::compile_glsl(&source, &path.display().to_string())
    }

    pub fn words(&self) -> &[u32] {
        &self.0
    }
}

/// True when the layout declares `local_size_x_id = 0` and `local_size_y_id = 1`.
fn workgroup_from_spec_constants(source: &str) -> bool {
    let packed: String = source
        .lines()
        .map(|line| line.split("//").next().unwrap_or_default())
        .flat_map(str::chars)
        .filter(|c| !c.is_whitespace())
        .collect();
    packed.contains("local_size_x_id=0") && packed.contains("local_size_y_id=1")
}
