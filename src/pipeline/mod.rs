pub mod classifier;
pub mod inference;
pub mod preprocess;
pub mod storage; // uploads directory
pub mod training; // confirmed-scan retraining loop
