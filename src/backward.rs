//! Reverse-mode traversal of the recorded op nodes for one graph.

use crate::array::{check_gradient_matches, Array};
use crate::error::Error;
use crate::graph::{ArrayNodeRef, GraphId};
use crate::ops;
use std::collections::HashSet;
use std::rc::Rc;

/// Computes gradients of `output` on `graph_id`, seeding with ones if the
/// output has no gradient yet.
///
/// Gradients accumulate into every array reachable from `output` that
/// requires grad on `graph_id`. If `output` is not connected to `graph_id`
/// this does nothing.
pub fn backward(output: &Array, graph_id: &GraphId) -> Result<(), Error> {
    backward_with_seed(output, None, graph_id)
}

/// Like [`backward`], but sets the output gradient to `seed` first when given.
pub fn backward_with_seed(
    output: &Array,
    seed: Option<&Array>,
    graph_id: &GraphId,
) -> Result<(), Error> {
    if !output.is_grad_required(graph_id) {
        log::trace!(
            "array {} is not connected to graph '{}', skipping backward",
            output.id(),
            graph_id
        );
        return Ok(());
    }
    if let Some(seed) = seed {
        output.set_grad(graph_id, seed.clone())?;
    }
    backward_outputs(std::slice::from_ref(output), graph_id)
}

/// Runs one traversal from several outputs at once.
///
/// Each output keeps its current gradient if set and is seeded with ones
/// otherwise. Outputs not connected to `graph_id` are ignored.
pub fn backward_outputs(outputs: &[Array], graph_id: &GraphId) -> Result<(), Error> {
    let mut roots = Vec::new();
    for output in outputs {
        let Some(node) = output.node(graph_id) else {
            continue;
        };
        if node.borrow().grad.is_none() {
            node.borrow_mut().grad = Some(Array::ones_like(output)?);
        }
        roots.push(node);
    }
    if roots.is_empty() {
        return Ok(());
    }

    // --- Phase 1: Build Topological Sort ---
    let mut sorted = build_topo_sort(&roots, graph_id)?;
    sorted.reverse();

    // Intermediate gradients are recomputed; only roots and leaves keep theirs.
    let root_keys: HashSet<usize> = roots.iter().map(|root| Rc::as_ptr(root) as usize).collect();
    for node in &sorted {
        let is_intermediate = node
            .borrow()
            .op_node
            .as_ref()
            .is_some_and(|op_node| op_node.is_active(graph_id));
        if is_intermediate && !root_keys.contains(&(Rc::as_ptr(node) as usize)) {
            node.borrow_mut().grad = None;
        }
    }

    log::debug!(
        "backward on graph '{}' over {} array node(s)",
        graph_id,
        sorted.len()
    );

    // --- Phase 2: Traverse Graph and Propagate Gradients ---
    let stop_graph_ids = [*graph_id];
    for node in &sorted {
        let (op_node, grad_output) = {
            let node = node.borrow();
            (node.op_node.clone(), node.grad.clone())
        };
        let (Some(op_node), Some(grad_output)) = (op_node, grad_output) else {
            continue;
        };
        if !op_node.is_active(graph_id) {
            continue;
        }

        for input in &op_node.inputs {
            let Some(input_node) = input.nodes.get(graph_id) else {
                continue;
            };
            let grad = input.backward_fn.apply(&grad_output, &stop_graph_ids)?;
            accumulate_grad(input_node, grad)?;
        }
    }
    Ok(())
}

/// Adds `grad` into the node's gradient slot after checking it fits.
fn accumulate_grad(node: &ArrayNodeRef, grad: Array) -> Result<(), Error> {
    // Step 1: validate and read the existing gradient, releasing the borrow
    let existing = {
        let node = node.borrow();
        check_gradient_matches(node.array_id, &node.shape, node.dtype, &grad)?;
        node.grad.clone()
    };

    // Step 2: compute the new total without holding any borrow
    let total = match existing {
        Some(existing) => ops::add(&existing, &grad)?,
        None => grad,
    };

    node.borrow_mut().grad = Some(total);
    Ok(())
}

/// Inputs of `node` on `graph_id`, if its op node is active there.
fn active_inputs(node: &ArrayNodeRef, graph_id: &GraphId) -> Vec<ArrayNodeRef> {
    let node = node.borrow();
    match node.op_node.as_ref() {
        Some(op_node) if op_node.is_active(graph_id) => op_node
            .inputs
            .iter()
            .filter_map(|input| input.nodes.get(graph_id).cloned())
            .collect(),
        _ => Vec::new(),
    }
}

/// DFS post-order over array nodes on `graph_id`: inputs before consumers.
///
/// Uses an explicit stack of `(node, inputs, cursor)` frames so deep chains
/// do not exhaust the call stack.
fn build_topo_sort(roots: &[ArrayNodeRef], graph_id: &GraphId) -> Result<Vec<ArrayNodeRef>, Error> {
    let mut sorted = Vec::new();
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();
    let key = |node: &ArrayNodeRef| Rc::as_ptr(node) as usize;

    for root in roots {
        if visited.contains(&key(root)) {
            continue;
        }
        visiting.insert(key(root));
        let mut stack = vec![(root.clone(), active_inputs(root, graph_id), 0usize)];

        while let Some((node, inputs, cursor)) = stack.last_mut() {
            if let Some(input) = inputs.get(*cursor).cloned() {
                *cursor += 1;
                let input_key = key(&input);
                if visited.contains(&input_key) {
                    continue;
                }
                if !visiting.insert(input_key) {
                    return Err(Error::InternalLogicError(format!(
                        "Cycle detected in graph '{}' involving array {}",
                        graph_id,
                        input.borrow().array_id
                    )));
                }
                let inputs = active_inputs(&input, graph_id);
                stack.push((input, inputs, 0));
            } else {
                let node_key = key(node);
                visiting.remove(&node_key);
                visited.insert(node_key);
                sorted.push(node.clone());
                stack.pop();
            }
        }
    }
    Ok(sorted)
}
