#![cfg(feature = "serialization")] // Only compile this test module if "serialization" is enabled

use tapegrad::{Array, ArraySnapshot, Context, DeviceId, Dtype, Error, GraphId, Storage};

#[test]
fn test_array_json_round_trip() -> Result<(), Error> {
    let device = Context::new().default_device()?;
    let graph = GraphId::new("serialization");
    let original = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2], &device)?;
    original.require_grad(&graph)?;

    let json = original.to_json()?;
    let restored = Array::from_json(&json, &device)?;

    assert_eq!(restored.shape(), vec![2, 2]);
    assert_eq!(restored.dtype(), Dtype::Float32);
    assert_eq!(restored.to_vec::<f32>()?, original.to_vec::<f32>()?);
    // Gradient state is not part of a snapshot
    assert!(!restored.is_grad_required(&graph));
    Ok(())
}

#[test]
fn test_snapshot_validation() -> Result<(), Error> {
    let device = Context::new().default_device()?;
    let snapshot = ArraySnapshot {
        shape: vec![3],
        dtype: Dtype::Int32,
        data: Storage::from_vec(vec![1.0f64, 2.0, 3.0], &[3])?,
    };
    assert!(matches!(
        Array::from_snapshot(snapshot, &device),
        Err(Error::DtypeMismatch { .. })
    ));
    assert!(matches!(
        Array::from_json("not json", &device),
        Err(Error::InvalidOperation(_))
    ));
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[test]
fn test_ids_serialize_as_names() -> Result<(), Error> {
    assert_eq!(to_json(&Dtype::UInt8), "\"UInt8\"");
    assert_eq!(to_json(&GraphId::new("ser_graph")), "\"ser_graph\"");

    let id = DeviceId::new("native", 2);
    let restored: DeviceId = serde_json::from_str(&to_json(&id))
        .map_err(|e| Error::InternalLogicError(format!("Deserialization failed: {}", e)))?;
    assert_eq!(restored, id);

    let graph: GraphId = serde_json::from_str("\"ser_graph\"")
        .map_err(|e| Error::InternalLogicError(format!("Deserialization failed: {}", e)))?;
    assert_eq!(graph, GraphId::new("ser_graph"));
    Ok(())
}
