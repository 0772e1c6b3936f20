pub mod attention;
pub mod bert;
pub mod conv;
pub mod embedding;
pub mod rnn;
pub mod transformer;
