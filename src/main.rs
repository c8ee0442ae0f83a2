use std::path::PathBuf;

use clap::Parser;
use rust_onnxml_graph::{
    BackendKind, BinaryScore, ConversionOptions, ConverterRegistry, GraphError, Parity, Tensor,
    compare_predictions, debug, graph_to_dot, load_graph_from_path, load_rows_from_path,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert ONNX-ML linear classifier graphs into executable plans", long_about = None)]
struct Cli {
    /// Path to a JSON file describing the operator graph.
    graph: PathBuf,
    /// Backend that executes the converted plan.
    #[arg(long, default_value = "ndarray")]
    backend: String,
    /// JSON file holding `[batch, features]` rows to predict.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Report binary scores as `[1 - p, p]` rows instead of `p`.
    #[arg(long)]
    two_column_binary: bool,
    /// Optional override for the initializer element limit.
    #[arg(long)]
    constant_limit: Option<usize>,
    /// Optional path to write a Graphviz DOT export of the graph.
    #[arg(long)]
    export_dot: Option<PathBuf>,
    /// Run the input on a second backend and check that both agree.
    #[arg(long, requires = "input")]
    compare_with: Option<String>,
    /// Absolute score tolerance used by `--compare-with`.
    #[arg(long, default_value_t = 1e-5)]
    atol: f64,
    /// Require bit-identical scores in `--compare-with`.
    #[arg(long)]
    exact: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(debug::default_log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_tensor(name: &str, tensor: &Tensor) {
    println!("{name} {:?} {:?}:", tensor.data_type(), tensor.shape());
    match tensor {
        Tensor::F32(array) => println!("{array}"),
        Tensor::F64(array) => println!("{array}"),
        Tensor::I64(array) => println!("{array}"),
    }
}

fn run() -> Result<(), GraphError> {
    let cli = Cli::parse();
    init_tracing();

    let graph = load_graph_from_path(&cli.graph)?;
    let mut options = ConversionOptions::default();
    if let Some(limit) = cli.constant_limit {
        options.constant_element_limit = limit;
    }
    if cli.two_column_binary {
        options = options.with_binary_score(BinaryScore::TwoColumn);
    }

    let registry = ConverterRegistry::with_defaults();
    // Rows load as float32; cast them to whatever the graph input declares.
    let input = match (&cli.input, graph.inputs().first()) {
        (Some(path), Some(declared)) => Some(load_rows_from_path(path)?.cast(declared.data_type)),
        (Some(path), None) => Some(load_rows_from_path(path)?),
        (None, _) => None,
    };
    let model = registry.convert(&cli.backend, &graph, input.as_ref(), &options)?;

    println!(
        "Converted graph from `{}` with {} nodes into {} steps on the `{}` backend.",
        cli.graph.display(),
        graph.nodes().len(),
        model.plan().steps().len(),
        model.backend()
    );
    println!("{}", model.plan());

    if let Some(dot_path) = cli.export_dot {
        let dot = graph_to_dot(&graph);
        std::fs::write(&dot_path, dot).map_err(|err| GraphError::export(dot_path.clone(), err))?;
        println!("Exported Graphviz DOT to `{}`.", dot_path.display());
    }

    let Some(input) = input else {
        return Ok(());
    };
    let prediction = model.predict(&input)?;
    print_tensor("label", &prediction.label);
    print_tensor("score", &prediction.score);

    if let Some(other) = cli.compare_with {
        let backend = BackendKind::parse(&other)?;
        let reference = registry.convert(backend.name(), &graph, Some(&input), &options)?;
        let parity = if cli.exact {
            Parity::Exact
        } else {
            Parity::Tolerance {
                atol: cli.atol,
                rtol: 0.0,
            }
        };
        match compare_predictions(&prediction, &reference.predict(&input)?, parity) {
            Ok(()) => println!("`{}` and `{}` agree ({parity}).", model.backend(), backend),
            Err(mismatch) => {
                eprintln!("`{}` and `{}` disagree: {mismatch}", model.backend(), backend);
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
