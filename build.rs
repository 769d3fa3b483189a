// Build script to compile GLSL shaders to SPIR-V
//
// Every shaders/*.{vert,geom,frag} becomes shaders/<name>.spv, which is the
// name the renderer loads at runtime.

use std::path::Path;
use std::process::Command;

const STAGES: [&str; 3] = ["vert", "geom", "frag"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let Ok(entries) = std::fs::read_dir("shaders") else {
        println!("cargo:warning=shaders/ directory not found, skipping shader compilation");
        return;
    };

    let mut sources: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| STAGES.contains(&ext))
        })
        .collect();
    sources.sort();

    for source in sources {
        let output = source.with_extension(format!(
            "{}.spv",
            source.extension().and_then(|e| e.to_str()).unwrap_or_default()
        ));
        compile_shader(&source, &output);
    }
}

fn compile_shader(input: &Path, output: &Path) {
    // Check if glslc is available
    let result = Command::new("glslc").arg(input).arg("-o").arg(output).status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            // The headless backend never loads SPIR-V, so a broken shader only
            // matters for the windowed run
            println!(
                "cargo:warning=Failed to compile {}: exit code {:?}",
                input.display(),
                status.code()
            );
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), shaders not compiled", e);
            println!(
                "cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}",
                input.display(),
                output.display()
            );
        }
    }
}
