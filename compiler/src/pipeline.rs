/// The batch entry point: source text in, DIMACS text out.
///
/// Each level fully consumes its input before the next level starts;
/// nothing is shared between compilations, so independent programs
/// can compile in parallel on separate pipelines.
use cnf::Metadata;

use crate::error::CompilerError;
use crate::{lowering, stdlib};

/// Optional header fields carried into the machine-code metadata.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompiledProgram {
    /// DIMACS CNF text with the commented JSON metadata header.
    pub dimacs: String,
    /// The same metadata, structured, for the runtime boundary.
    pub metadata: Metadata,
}

pub fn compile(source: &str, options: &CompileOptions) -> Result<CompiledProgram, CompilerError> {
    let program = sentient_parser::parse_program(source)?;

    let (mut instrs, returns) = stdlib::prelude();
    instrs.extend(lowering::lower(&program, returns)?);

    let mut metadata = Metadata::new();
    metadata.title = options.title.clone();
    metadata.description = options.description.clone();
    metadata.author = options.author.clone();
    metadata.date = options.date.clone();

    let (metadata, level2) = structures::Machine::compile(&instrs, metadata)?;
    let (metadata, level1) = arith::Machine::compile(&level2, metadata)?;
    let output = cnf::Machine::compile(&level1, metadata)?;

    Ok(CompiledProgram {
        dimacs: output.dimacs,
        metadata: output.metadata,
    })
}
