use std::fmt;

use super::{InsId, ModuleId, Program};
use crate::HashMap;

impl Program {
    fn fmt_module(&self, f: &mut fmt::Formatter<'_>, m: ModuleId) -> fmt::Result {
        let module = &self.modules[m];
        writeln!(f, "module: \"{}\"", module.name)?;
        let mut labels: HashMap<InsId, usize> = HashMap::default();
        for (index, &id) in module.order.iter().enumerate() {
            labels.insert(id, index);
            let inst = &self.instructions[id];
            write!(f, "  @{index} = {}", inst.op)?;
            if !inst.inputs.is_empty() {
                let args: Vec<String> = inst
                    .inputs
                    .iter()
                    .map(|i| match labels.get(i) {
                        Some(l) => format!("@{l}"),
                        None => format!("{i:?}"),
                    })
                    .collect();
                write!(f, "({})", args.join(", "))?;
            }
            if !inst.module_inputs.is_empty() {
                let names: Vec<&str> = inst
                    .module_inputs
                    .iter()
                    .filter_map(|&sub| self.modules.get(sub).map(|s| s.name.as_str()))
                    .collect();
                write!(f, ", [{}]", names.join(", "))?;
            }
            writeln!(f, " -> {}", inst.ty)?;
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    /// The main module first, then every other module in creation order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_module(f, self.main())?;
        for (id, _) in self.modules.iter().filter(|(id, _)| *id != self.main()) {
            writeln!(f)?;
            self.fmt_module(f, id)?;
        }
        Ok(())
    }
}
