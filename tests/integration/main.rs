//! End-to-end pipeline tests against a mock grocery site

mod pipeline;
