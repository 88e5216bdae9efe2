pub mod lenient_json;
pub mod token_counter;
