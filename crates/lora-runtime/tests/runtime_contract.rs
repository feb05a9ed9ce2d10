//! MockRuntime driven through the lora-engine trait objects, the way the
//! serving core drives it: load on one thread, stream from another.

use lora_engine::*;
use lora_runtime::{InferenceTimer, GenerationMode, LogTelemetry, MockRuntime};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn load_ready(runtime: &dyn ModelRuntime, device: Device) -> Arc<dyn LoadedModel> {
    let spec = LoadSpec {
        base_model: "mock/base".to_string(),
        placement: Placement::on(device),
        quantization: Quantization::FourBit,
    };
    let mut model = runtime.load_base(&spec).unwrap();
    model.apply_adapter(Path::new("adapters/mock")).unwrap();
    model.merge_adapter().unwrap();
    model.set_inference_mode();
    Arc::from(model)
}

#[test]
fn placement_follows_reported_accelerators() {
    let runtime = MockRuntime::new().with_accelerators(Accelerators {
        cuda: true,
        mps: false,
    });
    let placement =
        resolve_placement(DevicePreference::Auto, runtime.accelerators(), true).unwrap();
    assert_eq!(placement.device, Device::Cuda);
    assert_eq!(placement.precision, Precision::Float16);
}

#[test]
fn streamed_fragments_concatenate_to_blocking_output() {
    let runtime: Arc<dyn ModelRuntime> =
        Arc::new(MockRuntime::new().with_reply(" streaming equals blocking "));
    let model = load_ready(runtime.as_ref(), Device::Cpu);
    let params = GenerationParameters::default();

    let blocking = model.generate("prompt", &params).unwrap();

    let worker_model = Arc::clone(&model);
    let worker_params = params.clone();
    let streamed = thread::spawn(move || {
        worker_model
            .generate_incremental("prompt", &worker_params, CancellationToken::new())
            .unwrap()
            .collect::<Result<String>>()
            .unwrap()
    })
    .join()
    .unwrap();

    assert_eq!(blocking, streamed);
}

#[test]
fn cancelling_from_another_thread_stops_a_slow_stream() {
    let runtime = MockRuntime::new()
        .with_reply("a b c d e f g h i j k l m n o p")
        .with_fragment_delay(Duration::from_millis(20));
    let model = load_ready(&runtime, Device::Cpu);
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };

    let produced = model
        .generate_incremental("prompt", &GenerationParameters::default(), cancel)
        .unwrap()
        .count();
    canceller.join().unwrap();

    assert!(produced < 16, "stream should stop early, produced {produced}");
}

#[test]
fn timer_counts_streamed_fragments() {
    let runtime = MockRuntime::new().with_reply("one two three");
    let model = load_ready(&runtime, Device::Cpu);
    let log = LogTelemetry::new();
    let mut timer = InferenceTimer::new(
        Device::Cpu,
        GenerationMode::Streaming,
        6,
        Arc::new(log.clone()),
    );

    for fragment in model
        .generate_incremental("prompt", &GenerationParameters::default(), CancellationToken::new())
        .unwrap()
    {
        fragment.unwrap();
        timer.mark_fragment();
    }
    timer.finish();

    assert_eq!(log.last_metrics().unwrap().fragments, 3);
}
