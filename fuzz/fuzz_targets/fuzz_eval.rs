#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(filter) = docql::query::parse_filter_json(s) {
            let docs = [
                bson::doc! {"a": 1, "b": 2, "name": "x"},
                bson::doc! {"a": 10, "b": -5, "name": "y", "nested": {"z": 3}, "arr": [1, {"k": "v"}]},
                bson::doc! {"active": true, "loc": {"type": "Point", "coordinates": [2.29, 48.85]}},
            ];
            for d in &docs {
                let _ = docql::query::eval_with_position(d, &filter);
            }
        }
    }
});
