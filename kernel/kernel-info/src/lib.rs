//! # Kernel Configuration
//!
//! Compile-time configuration shared across kernel subsystems. Centralizing
//! these values here keeps the physical memory subsystem free of magic
//! numbers and prevents configuration drift between components.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
