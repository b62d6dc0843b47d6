use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    let src_path = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap())
        .join("shaders")
        .join("procedural.comp");
    let src = fs::read_to_string(&src_path).unwrap();

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let spv = comp
        .compile_into_spirv(
            &src,
            shaderc::ShaderKind::Compute,
            "procedural.comp",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("procedural.comp.spv"), spv.as_binary_u8()).unwrap();

    println!("cargo:rerun-if-changed={}", src_path.display());
    println!("cargo:rerun-if-changed=build.rs");
}
