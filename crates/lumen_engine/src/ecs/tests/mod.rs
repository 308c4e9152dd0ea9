//! Cross-module ECS tests

mod hierarchy_tests;
