pub mod batch_reader;
