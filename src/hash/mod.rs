// Match finding for the encoder.
//
// - `rolling`: polynomial rolling hash (257, mod 2^22)
// - `table`: chained index of aligned blocks
// - `config`: matcher tuning
// - `matching`: the scan that turns a target window into ADD/COPY/RUN

pub mod config;
pub mod matching;
pub mod rolling;
pub mod table;
