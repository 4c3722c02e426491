//! Uniform, failure-isolating access to the register handler.
//!
//! Every handler error is logged here (when debugging) and returned as a plain
//! [`HandlerError`]; the engine treats it as affecting only that one register.

use super::registry::NameSet;
use super::traits::RegisterHandler;
use crate::error::HandlerError;
use crate::value::{Metadata, RegisterValue};

pub struct RegisterBridge<H> {
    handler: H,
    debug: bool,
}

impl<H: RegisterHandler> RegisterBridge<H> {
    pub fn new(handler: H, debug: bool) -> Self {
        Self { handler, debug }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Enumerates the handler's registers into `names`.
    pub fn names<const N: usize>(&self, mut names: NameSet<N>) -> NameSet<N> {
        self.handler.names(&mut names);
        if names.refused > 0 && self.debug {
            warn!("{} register names refused (invalid or over capacity)", names.refused);
        }
        names
    }

    pub fn metadata(&self, name: &str) -> Result<Metadata, HandlerError> {
        self.handler
            .metadata(name)
            .inspect_err(|e| self.report("metadata", name, e))
    }

    pub fn value(&self, name: &str) -> Result<RegisterValue, HandlerError> {
        self.handler
            .value(name)
            .inspect_err(|e| self.report("read", name, e))
    }

    pub fn set_value(&mut self, name: &str, value: RegisterValue) -> Result<(), HandlerError> {
        let result = self.handler.set_value(name, value);
        if let Err(e) = &result {
            self.report("write", name, e);
        }
        result
    }

    fn report(&self, op: &str, name: &str, err: &HandlerError) {
        if self.debug {
            warn!("register {}: {} failed: {:?}", name, op, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::traits::NameCollector;

    struct Flaky {
        written: Option<RegisterValue>,
    }

    impl RegisterHandler for Flaky {
        fn names(&self, collector: &mut dyn NameCollector) {
            collector.add("ok");
            collector.add("broken");
            collector.add("no/slash");
        }

        fn metadata(&self, name: &str) -> Result<Metadata, HandlerError> {
            match name {
                "ok" => Ok(Metadata::new()),
                _ => Err(HandlerError::UnknownRegister),
            }
        }

        fn value(&self, name: &str) -> Result<RegisterValue, HandlerError> {
            match name {
                "ok" => Ok(RegisterValue::Int(3)),
                _ => Err(HandlerError::Rejected),
            }
        }

        fn set_value(&mut self, name: &str, value: RegisterValue) -> Result<(), HandlerError> {
            if name != "ok" {
                return Err(HandlerError::UnknownRegister);
            }
            self.written = Some(value);
            Ok(())
        }
    }

    #[test]
    fn errors_stay_per_register() {
        let mut bridge = RegisterBridge::new(Flaky { written: None }, true);
        let names = bridge.names(NameSet::<4>::new());
        assert_eq!(names.iter().collect::<std::vec::Vec<_>>(), ["ok", "broken"]);

        assert_eq!(bridge.value("ok"), Ok(RegisterValue::Int(3)));
        assert_eq!(bridge.value("broken"), Err(HandlerError::Rejected));
        assert!(bridge.metadata("broken").is_err());

        assert_eq!(
            bridge.set_value("broken", RegisterValue::Int(1)),
            Err(HandlerError::UnknownRegister)
        );
        bridge.set_value("ok", RegisterValue::Int(1)).unwrap();
        assert_eq!(bridge.handler().written, Some(RegisterValue::Int(1)));
    }
}
