pub mod capture_queue;
pub mod sample_convert;
pub mod wav_format;
