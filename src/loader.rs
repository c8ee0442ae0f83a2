use std::fs;
use std::path::Path;

use crate::error::GraphError;
use crate::graph::OperatorGraph;
use crate::tensor::Tensor;

/// Parse an operator graph from its JSON encoding. The graph is validated
/// while it is deserialized.
pub fn graph_from_json(text: &str) -> Result<OperatorGraph, GraphError> {
    Ok(serde_json::from_str(text)?)
}

/// Load an operator graph from a `.json` file
pub fn load_graph_from_path(path: impl AsRef<Path>) -> Result<OperatorGraph, GraphError> {
    let path_ref = path.as_ref();
    match path_ref.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {}
        other => {
            return Err(GraphError::UnsupportedFileFormat {
                path: path_ref.to_path_buf(),
                reason: match other {
                    Some(ext) => format!("unsupported extension `.{ext}`, use .json"),
                    None => "no file extension found, use .json".to_string(),
                },
            });
        }
    }
    let contents = fs::read_to_string(path_ref).map_err(|err| GraphError::io(path_ref, err))?;
    graph_from_json(&contents)
}

/// Write `graph` as pretty-printed JSON.
pub fn save_graph_to_path(graph: &OperatorGraph, path: impl AsRef<Path>) -> Result<(), GraphError> {
    let path_ref = path.as_ref();
    let text = serde_json::to_string_pretty(graph)?;
    fs::write(path_ref, text).map_err(|err| GraphError::export(path_ref, err))
}

/// Load a `[batch, features]` float32 tensor from a JSON array of rows.
pub fn load_rows_from_path(path: impl AsRef<Path>) -> Result<Tensor, GraphError> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref).map_err(|err| GraphError::io(path_ref, err))?;
    let rows: Vec<Vec<f32>> = serde_json::from_str(&contents)?;
    Tensor::from_rows(&rows)
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::process;

    use super::*;
    use crate::tensor::DataType;

    fn scratch(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("onnxml-loader-{}-{name}", process::id()))
    }

    const GRAPH: &str = r#"{
        "inputs": [{"name": "X", "shape": [null, 2]}],
        "outputs": ["label", "probabilities"],
        "nodes": [{
            "op_type": "LinearClassifier",
            "inputs": ["X"],
            "outputs": ["label", "probabilities"],
            "attributes": {
                "coefficients": {"floats": [1.0, -1.0]},
                "intercepts": {"floats": [0.0]},
                "post_transform": {"string": "LOGISTIC"}
            }
        }]
    }"#;

    #[test]
    fn loads_graph_and_rows_from_json_files() {
        let graph_path = scratch("graph.json");
        fs::write(&graph_path, GRAPH).unwrap();
        let graph = load_graph_from_path(&graph_path).unwrap();
        assert_eq!(graph.inputs()[0].data_type, DataType::Float32);

        let copy_path = scratch("copy.json");
        save_graph_to_path(&graph, &copy_path).unwrap();
        assert_eq!(load_graph_from_path(&copy_path).unwrap(), graph);

        let rows_path = scratch("rows.json");
        fs::write(&rows_path, "[[1.0, 2.0], [3.0, 4.0]]").unwrap();
        let rows = load_rows_from_path(&rows_path).unwrap();
        assert_eq!(rows.shape(), &[2, 2]);

        for path in [graph_path, copy_path, rows_path] {
            let _ = fs::remove_file(path);
        }
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = load_graph_from_path("model.onnx").unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedFileFormat { .. }));
        assert!(err.to_string().contains(".onnx"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_graph_from_path(scratch("missing.json")).unwrap_err();
        assert!(matches!(err, GraphError::Io { .. }));
        assert!(err.to_string().contains("missing.json"));
    }

    #[test]
    fn invalid_graph_is_rejected_while_parsing() {
        let err = graph_from_json(r#"{"inputs": [{"name": "X"}], "outputs": ["Y"], "nodes": []}"#)
            .unwrap_err();
        assert!(matches!(err, GraphError::Parse { .. }));
        assert!(err.to_string().contains("graph must declare"));
    }
}
