//! Whole-frame renderer tests against the headless device

mod frame_tests;
