pub mod decode;
pub mod rates;
pub mod stream;
