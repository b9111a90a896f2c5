//! JavaScript module handling.
//!
//! Tokenizing, module-syntax scanning and down-levelling of ES modules into
//! the bundle's module registry, plus the registry runtime and the syntax
//! helpers down-levelled code relies on.

pub mod lexer;
pub mod lower;
pub mod syntax;

pub use lexer::{tokenize, LexError, LexErrorKind, Token, TokenKind};
pub use lower::{lower_module, quote, LowerError};
pub use syntax::{ModuleItem, ModuleSyntax, SyntaxError};

/// Module registry runtime placed at the top of every script bundle.
pub const RUNTIME: &str = r#"var __modules = {};
var __cache = {};
function __define(id, factory) {
  __modules[id] = factory;
}
function __require(id) {
  var cached = __cache[id];
  if (cached) {
    return cached.exports;
  }
  var factory = __modules[id];
  if (!factory) {
    throw new Error("Cannot find module " + id);
  }
  var module = { exports: {} };
  Object.defineProperty(module.exports, "__esModule", { value: true });
  __cache[id] = module;
  factory.call(undefined, module, module.exports, __require);
  return module.exports;
}
function __export(exports, getters) {
  Object.keys(getters).forEach(function (name) {
    Object.defineProperty(exports, name, { enumerable: true, get: getters[name] });
  });
}
function __reexport(exports, source) {
  Object.keys(source).forEach(function (name) {
    if (name !== "default" && !Object.prototype.hasOwnProperty.call(exports, name)) {
      Object.defineProperty(exports, name, {
        enumerable: true,
        get: function () {
          return source[name];
        }
      });
    }
  });
}
"#;

/// Object the down-levelled syntax reads its helpers from.
pub const HELPERS_OBJECT: &str = "babelHelpers";

/// Helpers defined by [`HELPERS`].
pub const SUPPORTED_HELPERS: &[&str] = &[
    "asyncToGenerator",
    "defineProperty",
    "extends",
    "objectDestructuringEmpty",
    "objectSpread2",
    "objectWithoutProperties",
    "toPropertyKey",
];

/// Syntax helpers, placed after the runtime when any module uses them.
pub const HELPERS: &str = r#"var babelHelpers = {
  toPropertyKey: function (key) {
    return typeof key === "symbol" ? key : String(key);
  },
  defineProperty: function (obj, key, value) {
    key = babelHelpers.toPropertyKey(key);
    if (key in obj) {
      Object.defineProperty(obj, key, { value: value, enumerable: true, configurable: true, writable: true });
    } else {
      obj[key] = value;
    }
    return obj;
  },
  "extends": function (target) {
    for (var i = 1; i < arguments.length; i++) {
      var source = arguments[i];
      for (var key in source) {
        if (Object.prototype.hasOwnProperty.call(source, key)) {
          target[key] = source[key];
        }
      }
    }
    return target;
  },
  ownKeys: function (source) {
    var keys = Object.keys(source);
    if (typeof Object.getOwnPropertySymbols === "function") {
      keys = keys.concat(Object.getOwnPropertySymbols(source).filter(function (sym) {
        return Object.getOwnPropertyDescriptor(source, sym).enumerable;
      }));
    }
    return keys;
  },
  objectSpread2: function (target) {
    for (var i = 1; i < arguments.length; i++) {
      var source = arguments[i] != null ? arguments[i] : {};
      babelHelpers.ownKeys(Object(source)).forEach(function (key) {
        babelHelpers.defineProperty(target, key, source[key]);
      });
    }
    return target;
  },
  objectWithoutProperties: function (source, excluded) {
    var target = {};
    if (source == null) {
      return target;
    }
    babelHelpers.ownKeys(Object(source)).forEach(function (key) {
      if (excluded.indexOf(key) < 0) {
        target[key] = source[key];
      }
    });
    return target;
  },
  objectDestructuringEmpty: function (obj) {
    if (obj == null) {
      throw new TypeError("Cannot destructure " + obj);
    }
  },
  asyncToGenerator: function (fn) {
    return function () {
      var self = this;
      var args = arguments;
      return new Promise(function (resolve, reject) {
        var gen = fn.apply(self, args);
        function step(method, arg) {
          var info;
          try {
            info = gen[method](arg);
          } catch (error) {
            reject(error);
            return;
          }
          if (info.done) {
            resolve(info.value);
          } else {
            Promise.resolve(info.value).then(next, thrown);
          }
        }
        function next(value) {
          step("next", value);
        }
        function thrown(error) {
          step("throw", error);
        }
        next(undefined);
      });
    };
  }
};
"#;

/// Open the bundle's enclosing scope.
pub const BUNDLE_OPEN: &str = "(function () {\n\"use strict\";\n";

/// Close the bundle's enclosing scope.
pub const BUNDLE_CLOSE: &str = "})();\n";

/// Registration of a module whose only export is a default value.
///
/// `value` must already be a JavaScript expression.
pub fn value_module(module_id: &str, value: &str) -> String {
    format!(
        "__define({}, function (module, exports) {{\n__export(exports, {{ \"default\": function () {{ return {}; }} }});\n}});\n",
        quote(module_id),
        value
    )
}

/// Registration of a module with no exports.
pub fn empty_module(module_id: &str) -> String {
    format!("__define({}, function () {{}});\n", quote(module_id))
}

/// Statement that evaluates a module.
pub fn require_call(module_id: &str) -> String {
    format!("__require({});\n", quote(module_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_module_exports_default() {
        let out = value_module("src/images/logo.png", &quote("images/logo.png"));
        assert!(out.starts_with("__define(\"src/images/logo.png\", function (module, exports) {"));
        assert!(out.contains("return \"images/logo.png\";"));
    }

    #[test]
    fn test_runtime_defines_registry_functions() {
        for name in ["__define", "__require", "__export", "__reexport"] {
            assert!(RUNTIME.contains(&format!("function {}(", name)), "{}", name);
        }
    }

    #[test]
    fn test_require_call() {
        assert_eq!(require_call("src/js/scripts.js"), "__require(\"src/js/scripts.js\");\n");
        assert_eq!(empty_module("a.css"), "__define(\"a.css\", function () {});\n");
    }
}
