#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(update) = docql::update::parse_update_json(s) {
            let base = bson::doc! {"_id": 1, "a": 1, "tags": ["x", "y"], "n": {"v": 2.5}};
            let ctx = docql::update::ApplyContext::default();
            let _ = docql::update::apply_update(&base, &update, &ctx);
        }
    }
});
