//! Secret-shared linear regression between a guest and a host holding different feature columns
//! of the same samples (vertically partitioned data).
//!
//! The guest holds the label and some features, the host holds further features. Both train a
//! joint linear model without revealing their features or their share of the weights to each
//! other: the weights stay additively shared for the whole training, and at the end each party
//! only learns the weights of its own features.
//!
//! ## Main Components
//!
//! * [`glm::SsheLinearRegression`]: fitting, prediction and persistence of the model.
//! * [`dataframe`]: a partitioned, block-typed dataframe, [`dataframe::DataFrame::set`] to add or
//!   replace columns, and the [`dataframe::loader::DataLoader`] that keeps mini-batches aligned
//!   across parties.
//! * [`mpc`]: secure computation on shared tensors, backed by a trusted [`mpc::dealer()`].
//! * [`federation`]: roles and the [`federation::Context`] through which parties exchange values.
//! * [`channel`]: the transport between parties.
//! * [`computing`]: the partitioned table the dataframe is built on.
//!
//! ## Basic Usage
//!
//! Every party runs the same steps, concurrently:
//!
//! 1. Set up a [`channel::Channel`] to all other parties and describe the federation with
//!    [`federation::Parties`].
//! 2. Load the local samples into a [`dataframe::DataFrame`] (the guest adds the label).
//! 3. Call [`glm::SsheLinearRegression::fit`], while the dealer party runs [`mpc::dealer()`].
//! 4. Call [`glm::SsheLinearRegression::predict`]; the guest receives the prediction frame.
//!
//! ## Example
//!
//! ```ignore
//! use sshe_glm::{
//!     channel::SimpleChannel,
//!     federation::{Context, Parties},
//!     glm::{SsheLinRParams, SsheLinearRegression},
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel: SimpleChannel = /* ... */
//! let train = /* the guest's features and label */
//! let parties = Parties { guest: 0, hosts: vec![1], arbiter: None, dealer: Some(2) };
//!
//! let ctx = Context::new(&channel, &parties, 0)?;
//! let mut linr = SsheLinearRegression::new(SsheLinRParams::default())?;
//! linr.fit(&ctx.sub("train"), &train).await?;
//! let predictions = linr.predict(&ctx.sub("predict"), &train).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! The dealer is trusted and must not collude with either party. Shares are masked with bounded
//! real-valued noise, so the masking hides values statistically rather than perfectly.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod computing;
pub mod dataframe;
pub mod federation;
pub mod glm;
pub mod mpc;
