#![no_main]

//! Fuzz target for container registration, inclusion, and resolution
//!
//! Applies an arbitrary stream of operations to a small container graph
//! and checks that lookups never panic and sealing stays consistent.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spindle::{Blueprint, CallArgs, Container, Instance, Key, Scope};
use std::sync::Arc;

#[derive(Clone, Debug, Arbitrary)]
struct SmallService {
    id: u32,
    name: String,
}

#[derive(Clone, Debug, Arbitrary)]
struct MediumService {
    id: u64,
    data: Vec<u8>,
}

/// Operations to perform on the container graph
#[derive(Debug, Arbitrary)]
enum ContainerOp {
    RegisterSmallValue(SmallService),
    RegisterMediumValue(MediumService),
    RegisterSmallFactory(u32),
    RegisterSingleton(u32),
    RegisterTokenValue(u8, u32),
    RegisterAlias(u8, u8),
    IncludeSecondary,
    OpenScope,
    MakeSmall,
    MakeMedium,
    MakeToken(u8),
    IsProvidedToken(u8),
    Includes,
    Dro,
}

fn token(slot: u8, tokens: &mut Vec<Key>) -> Key {
    let idx = (slot as usize) % 4;
    while tokens.len() <= idx {
        tokens.push(Key::token(format!("t{}", tokens.len())));
    }
    tokens[idx].clone()
}

fuzz_target!(|ops: Vec<ContainerOp>| {
    let primary = Container::new("fuzz-primary");
    let secondary = Container::new("fuzz-secondary");
    let mut tokens: Vec<Key> = Vec::new();
    let mut scope: Option<Scope> = None;

    for op in ops {
        match op {
            ContainerOp::RegisterSmallValue(svc) => {
                let _ = primary.value(svc);
            }
            ContainerOp::RegisterMediumValue(svc) => {
                let _ = secondary.value(svc);
            }
            ContainerOp::RegisterSmallFactory(id) => {
                let _ = primary.factory(Blueprint::of0(move || SmallService {
                    id,
                    name: String::new(),
                }));
            }
            ContainerOp::RegisterSingleton(id) => {
                let _ = primary.singleton(Blueprint::of0(move || MediumService {
                    id: id as u64,
                    data: Vec::new(),
                }));
            }
            ContainerOp::RegisterTokenValue(slot, v) => {
                let key = token(slot, &mut tokens);
                let _ = primary.value_at(key, Arc::new(v) as Instance);
            }
            ContainerOp::RegisterAlias(from, to) => {
                let from = token(from, &mut tokens);
                let to = token(to, &mut tokens);
                let _ = primary.alias(from, to);
            }
            ContainerOp::IncludeSecondary => {
                let _ = primary.include([&secondary]);
            }
            ContainerOp::OpenScope => {
                if let Ok(s) = Scope::new(&primary) {
                    scope = Some(s);
                }
            }
            ContainerOp::MakeSmall => {
                if let Some(s) = &scope {
                    let ctx = s.enter();
                    let _ = ctx.get::<SmallService>();
                }
            }
            ContainerOp::MakeMedium => {
                if let Some(s) = &scope {
                    let ctx = s.enter();
                    let _ = ctx.get::<MediumService>();
                }
            }
            ContainerOp::MakeToken(slot) => {
                if let Some(s) = &scope {
                    let key = token(slot, &mut tokens);
                    let ctx = s.enter();
                    let _ = ctx.make(&key);
                }
            }
            ContainerOp::IsProvidedToken(slot) => {
                if let Some(s) = &scope {
                    let key = token(slot, &mut tokens);
                    let _ = s.is_provided(&key);
                }
            }
            ContainerOp::Includes => {
                let _ = primary.includes(&secondary);
            }
            ContainerOp::Dro => {
                let _ = primary.dro();
            }
        }
    }

    // Registration against a sealed graph must fail, never panic.
    if scope.is_some() {
        assert!(primary.is_sealed());
        let _ = primary.value(SmallService {
            id: 0,
            name: String::new(),
        });
    }

    // Ad-hoc calls over whatever is registered must not panic either.
    if let Some(s) = &scope {
        let ctx = s.enter();
        let bp = Blueprint::new("probe", |_args: CallArgs| Ok(Arc::new(0u8) as Instance));
        let _ = ctx.call(&bp, CallArgs::new());
    }
});
