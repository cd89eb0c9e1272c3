//! Spatiotemporal neighbour graphs, edge sampling and embedding training
//! for visualising how a network's representation evolves over epochs.
//!
//! Per epoch: [`fuzzy`] builds the spatial graph, [`temporal`] links epochs,
//! [`sampler`] turns both into a sampling distribution, [`loader`] feeds
//! [`trainer`] which optimises a [`model::VisModel`] under [`loss`] (or
//! [`motion`] for trajectories) and persists it through [`checkpoint`].

pub mod backend;
pub mod checkpoint;
pub mod data;
pub mod distance;
pub mod error;
pub mod fuzzy;
pub mod knn;
pub mod loader;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod motion;
pub mod normalization;
pub mod sampler;
pub mod temporal;
pub mod trainer;

pub use error::{Result, VisError};

#[cfg(test)]
mod tests;
