use std::collections::HashMap;
use std::fmt::Write;

use crate::graph::OperatorGraph;

/// Render `graph` as Graphviz DOT. Graph inputs are ovals, initializers
/// diamonds, operator nodes boxes and graph outputs double circles.
pub fn graph_to_dot(graph: &OperatorGraph) -> String {
    let mut dot = String::from("digraph onnxml {\n");
    dot.push_str("  rankdir=LR;\n");
    dot.push_str("  node [fontname=\"Helvetica\"];\n");
    dot.push_str("  edge [fontname=\"Helvetica\"];\n\n");

    // value name -> DOT id of whatever defines it
    let mut sources: HashMap<&str, String> = HashMap::new();

    for (idx, input) in graph.inputs().iter().enumerate() {
        let node_id = format!("input_{idx}");
        let mut label_lines = vec![format!("Input {}", input.name), format!("{:?}", input.data_type)];
        if let Some(shape) = &input.shape {
            label_lines.push(format_shape(shape));
        }
        let _ = writeln!(
            dot,
            "  {} [shape=oval,style=filled,fillcolor=\"#d0e6ff\",label=\"{}\"];",
            node_id,
            escape_label(&label_lines.join("\n"))
        );
        sources.insert(input.name.as_str(), node_id);
    }

    for (idx, (name, constant)) in graph.initializers().iter().enumerate() {
        let node_id = format!("const_{idx}");
        let dims = constant
            .dims
            .iter()
            .map(|dim| Some(*dim))
            .collect::<Vec<_>>();
        let label = format!("{name}\n{:?}\n{}", constant.data_type, format_shape(&dims));
        let _ = writeln!(
            dot,
            "  {} [shape=diamond,style=filled,fillcolor=\"#f0f0f0\",label=\"{}\"];",
            node_id,
            escape_label(&label)
        );
        sources.insert(name.as_str(), node_id);
    }

    dot.push('\n');

    for (idx, node) in graph.nodes().iter().enumerate() {
        let node_id = format!("op_{idx}");
        let mut label_lines = vec![format!("{} (#{idx})", node.op_type)];
        if let Some(name) = &node.name
            && !name.is_empty()
            && name != &node.op_type
        {
            label_lines.push(name.clone());
        }
        let _ = writeln!(
            dot,
            "  {} [shape=box,style=rounded,label=\"{}\"];",
            node_id,
            escape_label(&label_lines.join("\n"))
        );
        for output in node.outputs.iter().filter(|output| !output.is_empty()) {
            sources.insert(output.as_str(), node_id.clone());
        }
    }

    for (idx, node) in graph.nodes().iter().enumerate() {
        for (input_idx, input) in node.inputs.iter().enumerate() {
            if let Some(source) = sources.get(input.as_str()) {
                let _ = writeln!(
                    dot,
                    "  {} -> op_{} [label=\"{}\"];",
                    source,
                    idx,
                    escape_label(&format!("in{input_idx}: {input}"))
                );
            }
        }
    }

    dot.push('\n');
    for (idx, output) in graph.outputs().iter().enumerate() {
        let node_id = format!("output_{idx}");
        let _ = writeln!(
            dot,
            "  {} [shape=doublecircle,style=filled,fillcolor=\"#d6f5d6\",label=\"{}\"];",
            node_id,
            escape_label(output)
        );
        if let Some(source) = sources.get(output.as_str()) {
            let _ = writeln!(dot, "  {} -> {} [label=\"out\"];", source, node_id);
        }
    }

    dot.push_str("}\n");
    dot
}

fn escape_label(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_shape(shape: &[Option<usize>]) -> String {
    if shape.is_empty() {
        "scalar".to_string()
    } else {
        shape
            .iter()
            .map(|dim| match dim {
                Some(extent) => extent.to_string(),
                None => "?".to_string(),
            })
            .collect::<Vec<_>>()
            .join("x")
    }
}
