//! FHIR RDF preparation CLI
//!
//! Command-line interface for normalizing FHIR JSON into canonical
//! pre-linked JSON-LD.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fhir_rdf_prep::{
    dotted, is_url, load_document_auto, prepare, Batch, BatchResult, FileStatus,
    NormalizeOptions, PathTypeResolver, SchemaGraph, ShapeValidator, TypeQuery, ValidateError,
    ValidatorKind, FHIR_NS,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fhir-rdf-prep")]
#[command(about = "Normalize FHIR JSON into canonical pre-linked JSON-LD")]
#[command(version)]
struct Cli {
    /// Log debug detail to stderr (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a FHIR document, or a directory of them
    Normalize {
        /// Input: .json file, directory of .json files, or URL (http:// or https://)
        input: String,

        /// Output file or directory (stdout if not specified for a single document)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Emit the JSON-LD linking context block
        #[arg(long)]
        context: bool,

        /// Do not emit the ontology header
        #[arg(long)]
        no_header: bool,

        /// Base IRI for owl:versionIRI
        #[arg(long, default_value = "http://build.fhir.org/")]
        version_base: String,

        /// Base IRI of the JSON-LD context documents
        #[arg(long, default_value = "https://fhircat.org/fhir-r4/original/contexts/")]
        context_server: String,

        /// FHIR server base used as @base
        #[arg(long, default_value = FHIR_NS)]
        fhir_server: String,

        /// No FHIR server: relative references are linked as ../Type/id
        #[arg(long)]
        no_fhir_server: bool,

        /// Schema graph file (default: bundled FHIR R4 ranges)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Validate each prepared document
        #[arg(long)]
        validate: bool,

        /// Validation backend
        #[arg(long, value_enum, default_value_t = ValidatorKind::Structural)]
        validator: ValidatorKind,

        /// Directory of <Type>.json shapes for the json-schema validator
        #[arg(long)]
        shapes: Option<PathBuf>,

        /// Summary format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Only report documents that were skipped or failed
        #[arg(long, short)]
        quiet: bool,
    },

    /// Show how a property path classifies against the schema
    Classify {
        /// Dotted property path (e.g., Observation.effectivePeriod.start)
        path: String,

        /// Schema graph file (default: bundled FHIR R4 ranges)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Normalize {
            input,
            output,
            pretty,
            context,
            no_header,
            version_base,
            context_server,
            fhir_server,
            no_fhir_server,
            schema,
            validate,
            validator,
            shapes,
            format,
            quiet,
        } => {
            let options = NormalizeOptions::new()
                .version_base(Some(version_base))
                .context_server(context_server)
                .fhir_server((!no_fhir_server).then_some(fhir_server))
                .add_context(context)
                .ontology_header(!no_header);

            run_normalize(NormalizeArgs {
                input,
                output,
                pretty,
                options,
                schema,
                validator: validate.then_some(validator),
                shapes,
                json_output: format == "json",
                quiet,
            })
        }

        Commands::Classify { path, schema, json } => run_classify(&path, schema.as_deref(), json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// The bundled graph, or a custom one loaded into `slot`.
fn load_graph<'a>(
    schema: Option<&Path>,
    slot: &'a mut Option<SchemaGraph>,
) -> Result<&'a SchemaGraph, u8> {
    match schema {
        Some(path) => {
            let graph = SchemaGraph::load(path).map_err(|e| {
                eprintln!("Error: {}", e);
                e.exit_code() as u8
            })?;
            Ok(&*slot.insert(graph))
        }
        None => SchemaGraph::global().map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        }),
    }
}

struct NormalizeArgs {
    input: String,
    output: Option<PathBuf>,
    pretty: bool,
    options: NormalizeOptions,
    schema: Option<PathBuf>,
    validator: Option<ValidatorKind>,
    shapes: Option<PathBuf>,
    json_output: bool,
    quiet: bool,
}

fn run_normalize(args: NormalizeArgs) -> Result<(), u8> {
    let mut custom = None;
    let graph = load_graph(args.schema.as_deref(), &mut custom)?;
    let resolver = PathTypeResolver::new(graph);

    let validator = match args.validator {
        Some(kind) => Some(kind.build(args.shapes.as_deref()).map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?),
        None => None,
    };

    if is_url(&args.input) {
        return run_normalize_url(&args, &resolver, validator.as_deref());
    }

    let mut batch = Batch::new(&resolver, &args.options).pretty(args.pretty);
    if let Some(validator) = validator.as_deref() {
        batch = batch.validator(validator);
    }

    let input = Path::new(&args.input);
    let result = batch
        .process_path(input, args.output.as_deref())
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;

    // Documents without an output location go to stdout.
    for file_result in &result.results {
        if let Some(document) = &file_result.document {
            println!("{}", to_json(document, args.pretty)?);
        }
    }

    if args.output.is_some() {
        report_batch(&result, args.json_output, args.quiet);
    } else {
        for file_result in &result.results {
            if let Some(message) = &file_result.message {
                let label = match file_result.status {
                    FileStatus::Skipped => "Skipped",
                    _ => "Error",
                };
                eprintln!("{}: {}: {}", label, file_result.file.display(), message);
            }
            for violation in &file_result.violations {
                eprintln!("  {}", violation);
            }
        }
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(1)
    }
}

fn run_normalize_url(
    args: &NormalizeArgs,
    resolver: &PathTypeResolver<'_>,
    validator: Option<&dyn ShapeValidator>,
) -> Result<(), u8> {
    let document = load_document_auto(&args.input).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let prepared = prepare(document, resolver, &args.options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    if let Some(validator) = validator {
        let focus = prepared.focus_node().unwrap_or_default();
        let shape = prepared.shape_label().unwrap_or_default();
        match validator.validate(&prepared.tree, focus, &shape) {
            Ok(()) => {}
            Err(ValidateError::Invalid { errors }) => {
                eprintln!("Validation failed:");
                for error in errors {
                    eprintln!("  {}", error);
                }
                return Err(1);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return Err(e.exit_code() as u8);
            }
        }
    }

    let json = to_json(&prepared.tree, args.pretty)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &json).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn to_json(value: &serde_json::Value, pretty: bool) -> Result<String, u8> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })
}

fn report_batch(result: &BatchResult, json_output: bool, quiet: bool) {
    if json_output {
        match serde_json::to_string_pretty(result) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error serializing summary: {}", e),
        }
        return;
    }

    if !quiet {
        println!("Normalizing {} ...\n", result.path.display());
    }

    for file_result in &result.results {
        let status_icon = match file_result.status {
            FileStatus::Ok => "\x1b[32m✓\x1b[0m",
            FileStatus::Skipped => "\x1b[33m-\x1b[0m",
            FileStatus::Error => "\x1b[31m✗\x1b[0m",
        };

        if !quiet || file_result.status != FileStatus::Ok {
            match &file_result.message {
                Some(message) => println!(
                    "  {} {}: {}",
                    status_icon,
                    file_result.file.display(),
                    message
                ),
                None => println!("  {} {}", status_icon, file_result.file.display()),
            }
        }
        for violation in &file_result.violations {
            println!("      {}", violation);
        }
    }

    println!();
    if result.is_ok() {
        println!(
            "\x1b[32m✓ {} files processed: {} normalized, {} skipped\x1b[0m",
            result.files_processed, result.succeeded, result.skipped
        );
    } else {
        println!(
            "\x1b[31m✗ {} files processed: {} normalized, {} skipped, {} failed\x1b[0m",
            result.files_processed, result.succeeded, result.skipped, result.failed
        );
    }
}

fn run_classify(path: &str, schema: Option<&Path>, json_output: bool) -> Result<(), u8> {
    let mut custom = None;
    let graph = load_graph(schema, &mut custom)?;
    let resolver = PathTypeResolver::new(graph);

    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        eprintln!("Error: empty path");
        return Err(2);
    }

    let declared = graph.range(&segments);
    let date_like = resolver.classify(&segments, TypeQuery::DateLike);
    let canonical = resolver.is_canonical(&segments);

    if json_output {
        let output = serde_json::json!({
            "path": dotted(&segments),
            "declared": declared,
            "dateLike": date_like,
            "canonical": canonical,
        });
        println!("{}", output);
    } else {
        println!("path:      {}", dotted(&segments));
        println!("declared:  {}", declared.unwrap_or("-"));
        println!("date-like: {}", date_like.as_deref().unwrap_or("-"));
        println!("canonical: {}", if canonical { "yes" } else { "no" });
    }
    Ok(())
}
