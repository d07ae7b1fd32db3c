#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(pipeline) = docql::aggregate::parse_pipeline_json(s) {
            let docs = vec![
                bson::doc! {"_id": 1, "g": "a", "v": 3, "xs": [1, 2]},
                bson::doc! {"_id": 2, "g": "b", "v": 7.5, "xs": []},
                bson::doc! {"_id": 3},
            ];
            let _ = docql::aggregate::run_pipeline(docs, &pipeline, docql::aggregate::PipelineOptions::default());
        }
    }
});
