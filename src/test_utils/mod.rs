pub mod random_stream;
