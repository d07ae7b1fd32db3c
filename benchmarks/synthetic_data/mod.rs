use docql::Document;
use docql::bson::doc;
use fake::Fake;
use fake::faker::address::en::CityName;
use fake::faker::name::en::Name;

const HOBBIES: [&str; 6] = ["Sports", "Cooking", "Cars", "Reading", "Hiking", "Chess"];

/// Person documents shaped like the `persons` examples: name, age, gender, city and a
/// variable-length hobby list.
pub fn persons(count: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            let n_hobbies: usize = (0..4).fake();
            let first: usize = (0..HOBBIES.len()).fake();
            let hobbies: Vec<&str> = (0..n_hobbies).map(|k| HOBBIES[(first + k) % HOBBIES.len()]).collect();
            let age: i32 = (18..80).fake();
            let name: String = Name().fake();
            let city: String = CityName().fake();
            doc! {
                "seq": i64::try_from(i).unwrap_or(i64::MAX),
                "name": name,
                "age": age,
                "gender": if i % 2 == 0 { "female" } else { "male" },
                "address": {"city": city},
                "hobbies": hobbies,
            }
        })
        .collect()
}
