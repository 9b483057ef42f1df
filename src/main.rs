// This file is an example of how to use the `vigil_vision` library.
// The main library entry point is `src/lib.rs`.

fn main() {
    println!("Vigil Vision Engine - Example Runner");
    // In a real application, you would create a config, instantiate the
    // pipeline, and process frames from a camera feed here.
    //
    // Example:
    // let config = vigil_vision::PipelineConfig::default();
    // let mut pipeline = vigil_vision::SurveillancePipeline::new(config);
    // let frame = grab_frame_from_camera();
    // let output = pipeline.process_frame(&frame)?;
    // if output.alarm_triggered {
    //     play_alarm_sound();
    // }
}
