#![forbid(unsafe_code)]


#[cfg(test)]
mod support;

#[cfg(test)]
mod determinism;

#[cfg(test)]
mod pipeline_contracts;

#[cfg(test)]
mod transfer_contracts;
