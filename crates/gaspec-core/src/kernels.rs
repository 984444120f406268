// The sources are embedded at build time; a kernel directory given at run
// time replaces them file by file.

use anyhow::Context;
use std::borrow::Cow;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    Unpack,
    Reduce,
    Spectrum,
}

impl Program {
    pub const ALL: [Program; 3] = [Program::Unpack, Program::Reduce, Program::Spectrum];

    pub fn file_name(self) -> &'static str {
        match self {
            Program::Unpack => "unpack.cl",
            Program::Reduce => "reduce.cl",
            Program::Spectrum => "spectrum.cl",
        }
    }

    pub fn kernel_names(self) -> &'static [&'static str] {
        match self {
            Program::Unpack => &["unpack_2bit"],
            Program::Reduce => &["magnitude", "sum", "reorder"],
            Program::Spectrum => &["zero_spectrum", "add_spectrum"],
        }
    }

    fn embedded(self) -> &'static str {
        match self {
            Program::Unpack => include_str!("../kernels/unpack.cl"),
            Program::Reduce => include_str!("../kernels/reduce.cl"),
            Program::Spectrum => include_str!("../kernels/spectrum.cl"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub origin: String,
    pub source: Cow<'static, str>,
}

pub fn load(program: Program, dir: Option<&Path>) -> anyhow::Result<ProgramSource> {
    match dir {
        Some(dir) => {
            let path = dir.join(program.file_name());
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("{}", path.display()))?;
            Ok(ProgramSource {
                origin: path.display().to_string(),
                source: Cow::Owned(source),
            })
        }
        None => Ok(ProgramSource {
            origin: format!("<embedded {}>", program.file_name()),
            source: Cow::Borrowed(program.embedded()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_sources_define_requested_kernels() {
        for program in Program::ALL {
            let src = load(program, None).unwrap();
            for name in program.kernel_names() {
                assert!(
                    src.source.contains(&format!("kernel void {name}(")),
                    "{} lacks kernel {name}",
                    src.origin
                );
            }
        }
    }

    #[test]
    fn directory_overrides_embedded_source() {
        let dir = std::env::temp_dir().join(format!("gaspec-kernels-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("spectrum.cl"), "// custom").unwrap();

        let src = load(Program::Spectrum, Some(&dir)).unwrap();
        assert_eq!(src.source, "// custom");
        assert!(src.origin.ends_with("spectrum.cl"));

        let err = load(Program::Unpack, Some(&dir)).unwrap_err();
        assert!(format!("{err:#}").contains("unpack.cl"), "{err:#}");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
